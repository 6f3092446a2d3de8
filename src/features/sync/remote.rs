//! Seams to the outside world: bearer tokens, the remote API and a
//! reachability check.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use super::operation::Payload;
use crate::error::{RemoteError, SyncError};
use crate::features::cache::Credit;

/// Header carrying the operation id so the server can drop replays.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Source of bearer credentials.
///
/// The engine asks once per drain cycle, never once per operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Produce a bearer token.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Token` if no credential can be obtained.
    async fn token(&self) -> Result<String, SyncError>;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, SyncError> {
        Ok(self.0.clone())
    }
}

/// A token read from an environment variable at each request.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Read the token from `var`.
    #[must_use]
    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> Result<String, SyncError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(SyncError::Token(format!("{} is not set", self.var))),
        }
    }
}

/// The commerce platform API the queue drains into.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// POST `payload` to `endpoint`, tagged with `idempotency_key`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Network` if no response arrived, or
    /// `RemoteError::Status` for a non-2xx response.
    async fn send(
        &self,
        token: &str,
        endpoint: &str,
        idempotency_key: &str,
        payload: &Payload,
    ) -> Result<(), RemoteError>;

    /// Fetch the current credits of a customer.
    ///
    /// # Errors
    ///
    /// Same classification as [`RemoteApi::send`].
    async fn fetch_credits(&self, token: &str, customer_id: &str)
        -> Result<Vec<Credit>, RemoteError>;
}

/// Tells whether the API can currently be reached.
///
/// Hosts without a platform network callback use this to drive
/// [`NetworkStatus`](super::NetworkStatus).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// How long a reachability request may take before the API counts as down.
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

/// `RemoteApi` over HTTP with JSON bodies.
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct CreditsResponse {
    credits: Vec<Credit>,
}

impl HttpRemoteApi {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if `base_url` is not an absolute URL
    /// that can carry a path.
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| SyncError::Config(format!("invalid API base URL: {base_url}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// The base URL with `segments` appended, each percent-encoded as a
    /// single path segment.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Network(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn bearer(token: &str) -> Result<HeaderValue, RemoteError> {
        HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| RemoteError::Network(format!("invalid token header: {e}")))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            code: status.as_u16(),
            message: error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
        })
    }
}

/// Pull a message out of an error body: `{"error": ..}`, `{"message": ..}`,
/// `{"errors": [..]}`, or the raw text.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Some(trimmed.to_string());
    };

    ["error", "message", "errors"]
        .iter()
        .find_map(|key| match value.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| item.as_str().map_or_else(|| item.to_string(), String::from))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            other => Some(other.to_string()),
        })
        .or_else(|| Some(trimmed.to_string()))
}

fn network(e: &reqwest::Error) -> RemoteError {
    RemoteError::Network(e.to_string())
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn send(
        &self,
        token: &str,
        endpoint: &str,
        idempotency_key: &str,
        payload: &Payload,
    ) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.url(endpoint.split('/').filter(|s| !s.is_empty()))?)
            .header(AUTHORIZATION, Self::bearer(token)?)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| network(&e))?;

        Self::check(response).await.map(|_| ())
    }

    async fn fetch_credits(
        &self,
        token: &str,
        customer_id: &str,
    ) -> Result<Vec<Credit>, RemoteError> {
        let response = self
            .client
            .get(self.url(["customers", customer_id, "credits"])?)
            .header(AUTHORIZATION, Self::bearer(token)?)
            .send()
            .await
            .map_err(|e| network(&e))?;

        let body: CreditsResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| network(&e))?;

        Ok(body.credits)
    }
}

#[async_trait]
impl Reachability for HttpRemoteApi {
    /// Any HTTP response counts, whatever its status; only a failure to
    /// get one means the API is out of reach.
    async fn is_reachable(&self) -> bool {
        match self
            .client
            .head(self.base_url.clone())
            .timeout(REACHABILITY_TIMEOUT)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "API unreachable");
                false
            }
        }
    }
}
