//! credit-sync - offline-first store credit for point-of-sale terminals
//!
//! This crate queues store-credit operations while a terminal is offline and
//! replays them, in order and exactly once server-side, when it reconnects.
//! The [`OfflineSync`] service is the entry point for hosts; the binary wraps
//! it in a command-line interface.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod output;
pub mod service;
pub mod storage;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::{RemoteError, SyncError};
pub use features::cache::{CreditLookup, CreditSource};
pub use features::sync::{NetworkStatus, Operation, OperationStatus, OperationType, SyncEvent};
pub use service::{OfflineSync, OfflineSyncBuilder};
