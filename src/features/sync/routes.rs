//! Dispatch table from operation type to remote endpoint.
//!
//! The drain loop never matches on operation types itself; it asks the
//! table for a [`Route`] and sends wherever that points. Adding an
//! operation type means adding a row here.

use serde_json::Value;

use super::operation::{OperationType, Payload};

/// Validator for an operation payload. Returns the reason on rejection.
pub type Validator = fn(&Payload) -> Result<(), String>;

/// Where and how an operation type is sent.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    /// Path relative to the API base URL.
    pub endpoint: &'static str,
    /// Payload check run at enqueue and again before each send.
    pub validate: Validator,
}

impl OperationType {
    /// Look up the route for this operation type.
    #[must_use]
    pub fn route(self) -> Route {
        match self {
            Self::CreditIssue => Route {
                endpoint: "credits/issue",
                validate: validate_credit_issue,
            },
            Self::CustomerUpdate => Route {
                endpoint: "customers/update",
                validate: validate_customer_update,
            },
            Self::TransactionLog => Route {
                endpoint: "transactions/log",
                validate: validate_transaction_log,
            },
            Self::ReceiptMetadata => Route {
                endpoint: "receipts/metadata",
                validate: validate_receipt_metadata,
            },
        }
    }
}

fn require_str(payload: &Payload, field: &str) -> Result<(), String> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
        Some(_) => Err(format!("'{field}' must be a non-empty string")),
        None => Err(format!("missing '{field}'")),
    }
}

fn validate_credit_issue(payload: &Payload) -> Result<(), String> {
    require_str(payload, "customerId")?;
    match payload.get("amount").and_then(Value::as_f64) {
        Some(amount) if amount > 0.0 && amount.is_finite() => Ok(()),
        Some(_) => Err("'amount' must be greater than zero".to_string()),
        None => Err("missing numeric 'amount'".to_string()),
    }
}

fn validate_customer_update(payload: &Payload) -> Result<(), String> {
    require_str(payload, "customerId")
}

fn validate_transaction_log(payload: &Payload) -> Result<(), String> {
    require_str(payload, "type")
}

fn validate_receipt_metadata(payload: &Payload) -> Result<(), String> {
    if payload.contains_key("transactionId") {
        require_str(payload, "transactionId")
    } else {
        require_str(payload, "customerId")
            .map_err(|_| "missing 'transactionId' or 'customerId'".to_string())
    }
}
