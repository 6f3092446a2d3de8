//! Queue management commands.

use serde_json::{json, Value};

use crate::cli::args::{ClearTarget, OutputFormat};
use crate::error::SyncError;
use crate::features::sync::{OperationStatus, OperationType, Payload};
use crate::output::{
    format_operations_pretty, format_receipt_pretty, format_status_pretty, to_json,
};
use crate::service::OfflineSync;

/// Queue an operation, then drain the queue if online.
///
/// # Errors
///
/// Returns `SyncError::InvalidPayload` for an unknown type or a payload that
/// is not a valid JSON object for that type.
pub async fn enqueue(
    service: &OfflineSync,
    operation: &str,
    payload: &str,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let operation_type = OperationType::parse(operation).ok_or_else(|| {
        SyncError::InvalidPayload(format!(
            "unknown operation type '{operation}' (expected one of: {})",
            OperationType::ALL
                .iter()
                .map(|t| t.as_str().to_lowercase().replace('_', "-"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    let payload = parse_payload(payload)?;

    let receipt = service.enqueue(operation_type, payload)?;

    let summary = if service.network().is_online() {
        match service.sync().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(error = %e, "queued, but sync failed");
                None
            }
        }
    } else {
        None
    };

    match format {
        OutputFormat::Json => to_json(&json!({
            "receipt": receipt,
            "sync": summary,
        })),
        OutputFormat::Pretty => {
            let mut output = format_receipt_pretty(&receipt);
            if let Some(summary) = summary {
                output.push('\n');
                output.push_str(&crate::output::format_summary_pretty(&summary));
            }
            Ok(output)
        }
    }
}

fn parse_payload(raw: &str) -> Result<Payload, SyncError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SyncError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        )),
        Err(e) => Err(SyncError::InvalidPayload(format!("payload is not JSON: {e}"))),
    }
}

/// Show queue status.
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn status(service: &OfflineSync, format: OutputFormat) -> Result<String, SyncError> {
    let stats = service.stats();
    let last_sync = service.last_sync_time();
    let online = service.network().is_online();

    match format {
        OutputFormat::Json => to_json(&json!({
            "pending": stats.pending,
            "failed": stats.failed,
            "completed": stats.completed,
            "online": online,
            "lastSyncTime": last_sync.map(|t| t.to_rfc3339()),
        })),
        OutputFormat::Pretty => Ok(format_status_pretty(&stats, last_sync, online)),
    }
}

/// List queued operations, optionally filtered by status.
///
/// # Errors
///
/// Returns `SyncError::InvalidPayload` for an unknown status name.
pub fn list(
    service: &OfflineSync,
    status: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let filter = status
        .map(|s| {
            OperationStatus::parse(s)
                .ok_or_else(|| SyncError::InvalidPayload(format!("unknown status '{s}'")))
        })
        .transpose()?;

    let operations = service.list(filter);

    match format {
        OutputFormat::Json => {
            let shown: Vec<_> = operations.iter().take(limit).collect();
            to_json(&json!({
                "count": operations.len(),
                "items": shown,
            }))
        }
        OutputFormat::Pretty => {
            let title = filter.map_or_else(
                || "Operations".to_string(),
                |s| format!("{} operations", capitalize(&s.to_string())),
            );
            Ok(format_operations_pretty(&operations, &title, limit))
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect::<String>().replace('_', " ")
    })
}

/// Return failed operations to the queue.
///
/// # Errors
///
/// Returns `SyncError::NotFound` if `id` names no failed operation.
pub fn retry(
    service: &OfflineSync,
    id: Option<&str>,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let reset = service.retry_failed(id)?;

    match format {
        OutputFormat::Json => to_json(&json!({ "reset": reset })),
        OutputFormat::Pretty => Ok(match id {
            Some(id) => format!("Reset operation {id} for retry"),
            None => format!("Reset {reset} failed operations for retry"),
        }),
    }
}

/// Discard the queue or the credit cache.
///
/// # Errors
///
/// Returns `SyncError::Config` without `force`, or `SyncError::Storage` if
/// the store cannot be written.
pub fn clear(
    service: &OfflineSync,
    target: ClearTarget,
    force: bool,
    format: OutputFormat,
) -> Result<String, SyncError> {
    if !force {
        return Err(SyncError::Config(
            "Use --force to clear; unsynced operations cannot be recovered".to_string(),
        ));
    }

    match target {
        ClearTarget::Queue => {
            let removed = service.clear_queue()?;
            match format {
                OutputFormat::Json => to_json(&json!({ "cleared": "queue", "removed": removed })),
                OutputFormat::Pretty => Ok(format!("Cleared {removed} operations from the queue")),
            }
        }
        ClearTarget::Cache => {
            service.clear_cache()?;
            match format {
                OutputFormat::Json => to_json(&json!({ "cleared": "cache" })),
                OutputFormat::Pretty => Ok("Cleared the credit cache".to_string()),
            }
        }
    }
}
