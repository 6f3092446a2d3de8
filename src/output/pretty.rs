use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::features::cache::{CreditLookup, CreditSource};
use crate::features::sync::{EnqueueReceipt, Operation, OperationStatus, QueueStats, SyncSummary};

/// Status line for an enqueued operation
pub fn format_receipt_pretty(receipt: &EnqueueReceipt) -> String {
    let op = &receipt.operation;
    let mut output = format!(
        "{} Queued {} {}",
        "✓".green(),
        op.operation_type.display_name().bold(),
        op.id.dimmed()
    );

    for evicted in &receipt.evicted {
        output.push_str(&format!(
            "\n{} Queue full, dropped {} {}",
            "!".red().bold(),
            evicted.operation_type.display_name(),
            evicted.id.dimmed()
        ));
    }

    if !receipt.persisted {
        output.push_str(&format!(
            "\n{} Not saved to disk; the operation may be lost on restart",
            "!".yellow().bold()
        ));
    }

    output
}

/// Queue status overview
pub fn format_status_pretty(
    stats: &QueueStats,
    last_sync: Option<DateTime<Utc>>,
    online: bool,
) -> String {
    let mut lines = Vec::new();

    lines.push("Offline Queue Status".bold().to_string());
    lines.push("─".repeat(40));

    let network = if online {
        "online".green()
    } else {
        "offline".yellow()
    };
    lines.push(format!("  Network:    {network}"));

    lines.push(format!(
        "  Pending:    {} {}",
        stats.pending,
        if stats.pending > 0 {
            "operations waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));

    lines.push(format!(
        "  Failed:     {} {}",
        stats.failed,
        if stats.failed > 0 {
            "operations need attention".red()
        } else {
            "".normal()
        }
    ));

    lines.push(format!(
        "  Synced:     {} {}",
        stats.completed,
        "recently".dimmed()
    ));

    let last = last_sync.map_or_else(|| "never".to_string(), |t| relative_age(t, Utc::now()));
    lines.push(format!("  Last sync:  {}", last.dimmed()));

    if stats.failed > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'credit-sync retry --all' to send failed operations again"
                .dimmed()
                .to_string(),
        );
    } else if stats.pending > 0 && online {
        lines.push(String::new());
        lines.push(
            "Run 'credit-sync sync' to send pending operations"
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Table of operations
pub fn format_operations_pretty(operations: &[Operation], title: &str, limit: usize) -> String {
    if operations.is_empty() {
        return format!("{title} (0)\n  No operations");
    }

    let mut lines = Vec::new();
    lines.push(format!("{} ({})", title.bold(), operations.len()));
    lines.push("─".repeat(72));
    lines.push(format!(
        "{:<24} {:<18} {:<17} {:<4} {}",
        "ID", "Type", "Created", "Try", "Status"
    ));
    lines.push("─".repeat(72));

    for op in operations.iter().take(limit) {
        let status = match op.status {
            OperationStatus::Pending => "pending".normal(),
            OperationStatus::InFlight => "in flight".cyan(),
            OperationStatus::Completed => "✓ synced".green(),
            OperationStatus::Failed => "✗ failed".red(),
        };

        lines.push(format!(
            "{:<24} {:<18} {:<17} {:<4} {}",
            op.id,
            op.operation_type.display_name(),
            op.created_at.format("%Y-%m-%d %H:%M"),
            op.attempts,
            status
        ));

        if let Some(error) = &op.last_error {
            lines.push(format!("{:>25}{}", "", truncate(error, 60).red()));
        }
    }

    if operations.len() > limit {
        lines.push(
            format!("… {} more", operations.len() - limit)
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Outcome of a sync request
pub fn format_summary_pretty(summary: &SyncSummary) -> String {
    use crate::features::sync::SkipReason;

    match summary.skipped {
        Some(SkipReason::Offline) => format!(
            "{} Offline; {} operations waiting",
            "○".yellow(),
            summary.remaining
        ),
        Some(SkipReason::AlreadyDraining) => {
            format!("{} A sync is already running", "○".yellow())
        }
        None if summary.processed == 0 && summary.failed == 0 => {
            "No pending operations to sync.".to_string()
        }
        None => {
            let mut output = format!("{} {} synced", "✓".green(), summary.processed);
            if summary.failed > 0 {
                output.push_str(&format!(", {}", format!("{} failed", summary.failed).red()));
            }
            if summary.remaining > 0 {
                output.push_str(&format!(
                    ", {}",
                    format!("{} still pending", summary.remaining).yellow()
                ));
            }
            output
        }
    }
}

/// A customer's credits
pub fn format_credits_pretty(lookup: &CreditLookup) -> String {
    let source = match lookup.source {
        CreditSource::Remote => "live".green(),
        CreditSource::Cache => "cached".cyan(),
        CreditSource::Stale => "cached, may be out of date".yellow(),
        CreditSource::NoData => "no data".red(),
    };

    let mut output = format!(
        "{} {}  {}\n",
        "Customer".bold(),
        lookup.customer_id.bold(),
        format!("({source})").dimmed()
    );

    if lookup.source == CreditSource::NoData {
        output.push_str("  No cached credits; connect to fetch them\n");
        return output;
    }

    output.push_str(&"─".repeat(48));
    output.push('\n');

    if lookup.credits.is_empty() {
        output.push_str("  No credits\n");
    }

    for credit in &lookup.credits {
        let mut line = format!("  {:<24} {:>10.2}", credit.id, credit.amount);
        if let Some(balance) = credit.balance {
            line.push_str(&format!("  {}", format!("{balance:.2} left").cyan()));
        }
        if let Some(expires) = credit.expires_at {
            line.push_str(&format!(
                "  {}",
                format!("expires {}", expires.format("%Y-%m-%d")).dimmed()
            ));
        }
        output.push_str(&line);
        output.push('\n');
    }

    output.push_str(&format!(
        "  {:<24} {:>10.2}\n",
        "Available".bold(),
        lookup.total_balance()
    ));

    if let Some(updated) = lookup.updated_at {
        output.push_str(&format!(
            "  {}\n",
            format!("Updated {}", relative_age(updated, Utc::now())).dimmed()
        ));
    }

    output
}

fn relative_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(then);
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::cache::Credit;
    use crate::features::sync::{OperationType, Payload, SkipReason};
    use chrono::Duration;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_relative_age() {
        let now = Utc::now();
        assert_eq!(relative_age(now, now), "just now");
        assert_eq!(relative_age(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(relative_age(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(relative_age(now - Duration::days(2), now), "2 days ago");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer message", 10), "a much ...");
    }

    #[test]
    fn test_empty_operations() {
        plain();
        let output = format_operations_pretty(&[], "Pending", 20);
        assert!(output.contains("No operations"));
    }

    #[test]
    fn test_operations_show_errors_and_overflow() {
        plain();
        let mut failed = Operation::new(OperationType::CustomerUpdate, Payload::new());
        failed.status = OperationStatus::Failed;
        failed.last_error = Some("Customer not found".to_string());
        let pending = Operation::new(OperationType::CreditIssue, Payload::new());

        let output = format_operations_pretty(&[failed, pending], "Queue", 1);
        assert!(output.contains("Customer Update"));
        assert!(output.contains("Customer not found"));
        assert!(output.contains("1 more"));
        assert!(!output.contains("Credit Issue"));
    }

    #[test]
    fn test_summary_variants() {
        plain();
        let offline = SyncSummary {
            processed: 0,
            failed: 0,
            remaining: 2,
            skipped: Some(SkipReason::Offline),
        };
        assert!(format_summary_pretty(&offline).contains("2 operations waiting"));

        let ran = SyncSummary {
            processed: 3,
            failed: 1,
            remaining: 1,
            skipped: None,
        };
        let output = format_summary_pretty(&ran);
        assert!(output.contains("3 synced"));
        assert!(output.contains("1 failed"));
        assert!(output.contains("1 still pending"));
    }

    #[test]
    fn test_credits_total() {
        plain();
        let lookup = CreditLookup {
            customer_id: "c1".to_string(),
            credits: vec![
                Credit {
                    id: "cr1".to_string(),
                    amount: 25.0,
                    balance: Some(10.0),
                    expires_at: None,
                    extra: serde_json::Map::new(),
                },
                Credit {
                    id: "cr2".to_string(),
                    amount: 5.0,
                    balance: None,
                    expires_at: None,
                    extra: serde_json::Map::new(),
                },
            ],
            updated_at: Some(Utc::now()),
            source: CreditSource::Cache,
        };
        let output = format_credits_pretty(&lookup);
        assert!(output.contains("cached"));
        assert!(output.contains("15.00"));
    }

    #[test]
    fn test_credits_no_data() {
        plain();
        let lookup = CreditLookup {
            customer_id: "c9".to_string(),
            credits: Vec::new(),
            updated_at: None,
            source: CreditSource::NoData,
        };
        assert!(format_credits_pretty(&lookup).contains("No cached credits"));
    }

    #[test]
    fn test_receipt_lists_every_dropped_operation() {
        plain();
        let dropped: Vec<Operation> = (0..2)
            .map(|_| Operation::new(OperationType::CreditIssue, Payload::new()))
            .collect();
        let receipt = EnqueueReceipt {
            operation: Operation::new(OperationType::CustomerUpdate, Payload::new()),
            evicted: dropped.clone(),
            persisted: true,
        };

        let output = format_receipt_pretty(&receipt);
        assert!(output.contains(&dropped[0].id));
        assert!(output.contains(&dropped[1].id));
        assert_eq!(output.matches("Queue full").count(), 2);
    }
}
