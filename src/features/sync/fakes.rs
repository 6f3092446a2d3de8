//! In-process stand-ins for the remote API, shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::operation::Payload;
use super::remote::RemoteApi;
use crate::error::RemoteError;
use crate::features::cache::Credit;

/// One request the fake received.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub token: String,
    pub endpoint: String,
    pub idempotency_key: String,
    pub payload: Payload,
}

/// Scriptable `RemoteApi`.
///
/// Sends succeed unless a queued result or a per-customer failure says
/// otherwise. Fetches return whatever credits were registered.
#[derive(Default)]
pub struct FakeRemote {
    sent: Mutex<Vec<SentRequest>>,
    scripted: Mutex<VecDeque<Result<(), RemoteError>>>,
    failing_customers: Mutex<HashMap<String, RemoteError>>,
    credits: Mutex<HashMap<String, Vec<Credit>>>,
    fetch_error: Mutex<Option<RemoteError>>,
    fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next send.
    pub fn push_result(&self, result: Result<(), RemoteError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    /// Fail every send whose payload names `customer_id`.
    pub fn fail_customer(&self, customer_id: &str, error: RemoteError) {
        self.failing_customers
            .lock()
            .unwrap()
            .insert(customer_id.to_string(), error);
    }

    pub fn set_credits(&self, customer_id: &str, credits: Vec<Credit>) {
        self.credits
            .lock()
            .unwrap()
            .insert(customer_id.to_string(), credits);
    }

    pub fn fail_fetches(&self, error: Option<RemoteError>) {
        *self.fetch_error.lock().unwrap() = error;
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

pub fn server_error() -> RemoteError {
    RemoteError::Status {
        code: 500,
        message: "Internal Server Error".to_string(),
    }
}

pub fn credit(id: &str, amount: f64) -> Credit {
    Credit {
        id: id.to_string(),
        amount,
        balance: Some(amount),
        expires_at: None,
        extra: serde_json::Map::new(),
    }
}

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn send(
        &self,
        token: &str,
        endpoint: &str,
        idempotency_key: &str,
        payload: &Payload,
    ) -> Result<(), RemoteError> {
        // Hand control back once, like a real round trip would
        tokio::task::yield_now().await;

        self.sent.lock().unwrap().push(SentRequest {
            token: token.to_string(),
            endpoint: endpoint.to_string(),
            idempotency_key: idempotency_key.to_string(),
            payload: payload.clone(),
        });

        if let Some(result) = self.scripted.lock().unwrap().pop_front() {
            return result;
        }

        let customer = payload.get("customerId").and_then(Value::as_str);
        match customer.and_then(|c| self.failing_customers.lock().unwrap().get(c).cloned()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn fetch_credits(
        &self,
        _token: &str,
        customer_id: &str,
    ) -> Result<Vec<Credit>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fetch_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .credits
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .unwrap_or_default())
    }
}
