use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::config::HOME_ENV;

#[derive(Parser)]
#[command(name = "credit-sync")]
#[command(about = "Offline operation queue and sync engine for point-of-sale store credit")]
#[command(long_about = "credit-sync - offline-first store credit for point-of-sale terminals

Records credit issues, customer updates, transaction logs and receipt
metadata while the terminal is offline, and replays them to the commerce
API in order once it is back online. Every operation carries a stable id
sent as an Idempotency-Key so replays are never applied twice.

QUICK START:
  credit-sync enqueue credit-issue --payload '{\"customerId\":\"c1\",\"amount\":25}'
  credit-sync status                 Show what is waiting
  credit-sync sync                   Drain the queue now
  credit-sync credits c1             Look up a customer's credits
  credit-sync watch                  Sync on reconnect and on an interval

The bearer token is read from CREDIT_SYNC_TOKEN.

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Defaults to the `general.default_output` config setting.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Treat the terminal as offline
    ///
    /// Operations are queued without a sync attempt and credit lookups are
    /// served from the local cache only.
    #[arg(long, global = true)]
    pub offline: bool,

    /// Data directory holding config.yaml and the database
    #[arg(long, global = true, env = HOME_ENV, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue an operation for the commerce API
    ///
    /// The payload is validated before it is stored. When online, the queue
    /// is drained right after.
    ///
    /// # Operation types
    ///
    ///   credit-issue        customerId, amount > 0
    ///   customer-update     customerId
    ///   transaction-log     type
    ///   receipt-metadata    transactionId or customerId
    ///
    /// # Examples
    ///
    ///   credit-sync enqueue credit-issue --payload '{"customerId":"c1","amount":25}'
    ///   credit-sync enqueue transaction-log --payload '{"type":"refund","total":12.5}'
    #[command(alias = "q")]
    Enqueue {
        /// Operation type
        operation: String,

        /// JSON object sent as the request body
        #[arg(long, short = 'p')]
        payload: String,
    },

    /// Show queue status
    ///
    /// Displays pending, failed and recently synced operations along with
    /// the time of the last sync.
    Status,

    /// List queued operations
    #[command(alias = "ls")]
    List {
        /// Filter by status (pending, in_flight, completed, failed)
        #[arg(long, short = 's')]
        status: Option<String>,

        /// Maximum operations to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Drain the queue now
    Sync,

    /// Return failed operations to the queue
    ///
    /// Gives the operation a fresh retry budget; its attempt count is kept.
    Retry {
        /// Retry every failed operation
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// Operation id to retry
        #[arg(required_unless_present = "all")]
        id: Option<String>,
    },

    /// Look up a customer's store credits
    ///
    /// Served from the server when online, from the local cache otherwise.
    Credits {
        /// Customer id
        customer: String,

        /// Fetch from the server even if the cached entry is fresh
        #[arg(long, short = 'r')]
        refresh: bool,
    },

    /// Discard local data
    Clear {
        /// What to clear
        #[arg(value_enum)]
        target: ClearTarget,

        /// Required; queued operations that were never synced are lost
        #[arg(long)]
        force: bool,
    },

    /// Keep syncing until interrupted
    ///
    /// Each `sync.interval_secs` tick checks that the API answers, then
    /// syncs if the device is online. Stop with Ctrl-C.
    Watch,
}

/// Local data that `clear` can discard.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearTarget {
    /// The offline operation queue
    Queue,
    /// The credit cache
    Cache,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::try_parse_from([
            "credit-sync",
            "enqueue",
            "credit-issue",
            "--payload",
            r#"{"customerId":"c1","amount":25}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Enqueue { operation, payload } => {
                assert_eq!(operation, "credit-issue");
                assert!(payload.contains("c1"));
            }
            _ => panic!("expected enqueue"),
        }
        assert_eq!(cli.output, None);
        assert!(!cli.offline);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["credit-sync", "status", "--offline", "-o", "json", "-vv"])
            .unwrap();
        assert!(cli.offline);
        assert_eq!(cli.output, Some(OutputFormat::Json));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_retry_requires_id_or_all() {
        assert!(Cli::try_parse_from(["credit-sync", "retry"]).is_err());
        assert!(Cli::try_parse_from(["credit-sync", "retry", "--all", "abc"]).is_err());
        assert!(Cli::try_parse_from(["credit-sync", "retry", "--all"]).is_ok());
    }

    #[test]
    fn test_clear_target() {
        let cli = Cli::try_parse_from(["credit-sync", "clear", "cache", "--force"]).unwrap();
        match cli.command {
            Commands::Clear { target, force } => {
                assert_eq!(target, ClearTarget::Cache);
                assert!(force);
            }
            _ => panic!("expected clear"),
        }
    }
}
