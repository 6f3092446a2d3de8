//! Error types for credit-sync.

use thiserror::Error;

/// Failure returned by the remote commerce API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Message extracted from the response body.
        message: String,
    },
}

impl RemoteError {
    /// Whether the failure is transient and the request may be replayed.
    ///
    /// Network errors, 5xx and 429 are retryable. Any other status is a
    /// client/validation error that replaying will not fix.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { code, .. } => *code == 429 || *code >= 500,
        }
    }

    /// Human-readable message suitable for `last_error`.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Network(msg) => msg.clone(),
            Self::Status { message, .. } => message.clone(),
        }
    }
}

/// Main error type for credit-sync.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Device-local storage failed (serialization, quota, backend error).
    #[error("Storage error: {0}")]
    Storage(String),

    /// `SQLite` error.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The payload does not satisfy the operation's route validator.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Item not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The token provider could not produce a bearer credential.
    #[error("Token error: {0}")]
    Token(String),

    /// The remote API rejected or failed a request.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl SyncError {
    /// Get the exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 2,
            Self::InvalidPayload(_) | Self::Config(_) => 3,
            Self::Token(_) | Self::Remote(_) => 4,
            Self::Storage(_) | Self::Database(_) | Self::Io(_) | Self::Parse(_) => 1,
        }
    }
}
