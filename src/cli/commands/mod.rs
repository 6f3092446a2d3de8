//! Command implementations for credit-sync.
//!
//! Each command takes the assembled [`OfflineSync`](crate::service::OfflineSync)
//! and returns the text to print.

mod credits;
mod queue;
mod sync;

pub use credits::credits;
pub use queue::{clear, enqueue, list, retry, status};
pub use sync::{sync, watch};
