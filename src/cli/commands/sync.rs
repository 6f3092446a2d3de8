//! Sync commands.

use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::features::sync::SyncEvent;
use crate::output::{format_summary_pretty, to_json};
use crate::service::OfflineSync;

/// Drain the queue once.
///
/// # Errors
///
/// Returns `SyncError::Token` if no bearer token is available.
pub async fn sync(service: &OfflineSync, format: OutputFormat) -> Result<String, SyncError> {
    let summary = service.sync().await?;

    match format {
        OutputFormat::Json => to_json(&summary),
        OutputFormat::Pretty => Ok(format_summary_pretty(&summary)),
    }
}

/// Run the connectivity monitor until Ctrl-C, printing sync events.
///
/// # Errors
///
/// Returns `SyncError::Io` if the interrupt handler cannot be installed.
pub async fn watch(service: &OfflineSync, format: OutputFormat) -> Result<String, SyncError> {
    let mut events = service.subscribe();
    let monitor = service.start_monitor();

    if format == OutputFormat::Pretty {
        println!(
            "{}",
            "Watching for connectivity; press Ctrl-C to stop".dimmed()
        );
    }

    if let Err(e) = service.sync().await {
        tracing::warn!(error = %e, "initial sync failed");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", format_event(&event, format)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.shutdown().await;

    match format {
        OutputFormat::Json => Ok(String::new()),
        OutputFormat::Pretty => Ok("Stopped.".to_string()),
    }
}

fn format_event(event: &SyncEvent, format: OutputFormat) -> Result<String, SyncError> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string(event)?);
    }

    let now = chrono::Local::now().format("%H:%M:%S");
    let text = match event {
        SyncEvent::SyncStart { pending } => format!("syncing {pending} operations"),
        SyncEvent::SyncComplete(counts) => format!(
            "sync finished: {} synced, {} failed, {} pending",
            counts.processed, counts.failed, counts.remaining
        ),
        SyncEvent::SyncError { error } => format!("{} {error}", "sync error:".red()),
        SyncEvent::QueueOverflow { evicted_id } => format!(
            "{} dropped {evicted_id}",
            "queue full:".red().bold()
        ),
    };
    Ok(format!("{} {text}", now.to_string().dimmed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::sync::SyncCounts;

    #[test]
    fn test_event_json_is_one_line() {
        let line = format_event(
            &SyncEvent::SyncComplete(SyncCounts {
                processed: 1,
                failed: 0,
                remaining: 0,
            }),
            OutputFormat::Json,
        )
        .unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"event\":\"sync_complete\""));
    }

    #[test]
    fn test_event_pretty() {
        colored::control::set_override(false);
        let line = format_event(
            &SyncEvent::QueueOverflow {
                evicted_id: "abc".to_string(),
            },
            OutputFormat::Pretty,
        )
        .unwrap();
        assert!(line.contains("queue full: dropped abc"));
    }
}
