//! Operation records for the offline queue.
//!
//! Defines the operations that can be queued while the device is offline and
//! the outcome of one attempt to send them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operation payload: an object of operation-specific fields.
pub type Payload = Map<String, Value>;

/// Operation types that can be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Issue store credit to a customer
    CreditIssue,
    /// Update customer details
    CustomerUpdate,
    /// Record a point-of-sale transaction
    TransactionLog,
    /// Attach receipt metadata to a transaction
    ReceiptMetadata,
}

impl OperationType {
    /// All operation types, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::CreditIssue,
        Self::CustomerUpdate,
        Self::TransactionLog,
        Self::ReceiptMetadata,
    ];

    /// Get the display name for this operation type.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::CreditIssue => "Credit Issue",
            Self::CustomerUpdate => "Customer Update",
            Self::TransactionLog => "Transaction Log",
            Self::ReceiptMetadata => "Receipt Metadata",
        }
    }

    /// Wire name, as stored and accepted on the command line.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreditIssue => "CREDIT_ISSUE",
            Self::CustomerUpdate => "CUSTOMER_UPDATE",
            Self::TransactionLog => "TRANSACTION_LOG",
            Self::ReceiptMetadata => "RECEIPT_METADATA",
        }
    }

    /// Parse a wire name, case-insensitively. Dashes are accepted for
    /// underscores.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Self::ALL.into_iter().find(|t| t.as_str() == normalized)
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Waiting to be sent
    Pending,
    /// Currently being sent
    InFlight,
    /// Accepted by the server
    Completed,
    /// Rejected, or retries exhausted
    Failed,
}

impl OperationStatus {
    /// Check if this status is terminal (no more action needed).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Parse a status name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "pending" => Some(Self::Pending),
            "in_flight" | "inflight" => Some(Self::InFlight),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Result of one attempt to send an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The server accepted the operation.
    Success,
    /// Transient failure; the operation may be replayed.
    Retryable(String),
    /// Permanent failure; replaying will not help.
    Permanent(String),
}

/// A queued operation with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique ID, doubles as the idempotency key
    pub id: String,
    /// Operation type
    pub operation_type: OperationType,
    /// Operation-specific fields
    pub payload: Payload,
    /// When the operation was queued
    pub created_at: DateTime<Utc>,
    /// Number of send attempts that failed; never decreases
    pub attempts: u32,
    /// Value of `attempts` when the operation was last put back for a retry
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts_at_reset: u32,
    /// Current status
    pub status: OperationStatus,
    /// Last attempt timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    /// Last error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Operation {
    /// Create a new pending operation.
    #[must_use]
    pub fn new(operation_type: OperationType, payload: Payload) -> Self {
        let created_at = Utc::now();
        Self {
            id: generate_id(created_at),
            operation_type,
            payload,
            created_at,
            attempts: 0,
            attempts_at_reset: 0,
            status: OperationStatus::Pending,
            last_attempt: None,
            last_error: None,
        }
    }

    /// Customer this operation concerns, if the payload names one.
    #[must_use]
    pub fn customer_id(&self) -> Option<&str> {
        self.payload.get("customerId").and_then(Value::as_str)
    }

    /// Check if the operation still counts toward the pending badge.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Failed attempts since the last manual retry.
    #[must_use]
    pub const fn attempts_since_reset(&self) -> u32 {
        self.attempts.saturating_sub(self.attempts_at_reset)
    }

    /// Put a failed operation back in line with a fresh retry budget.
    /// The attempt history is kept.
    pub fn reset_for_retry(&mut self) {
        self.status = OperationStatus::Pending;
        self.attempts_at_reset = self.attempts;
        self.last_error = None;
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Build an id of the form `{unix millis}-{8 hex chars}`.
///
/// Ids are unique but only roughly ordered: the random suffix does not
/// order ids minted in the same millisecond. Queue order is kept by the
/// queue itself, never by sorting ids.
fn generate_id(at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{:013}-{}", at.timestamp_millis(), &suffix[..8])
}
