//! Feature implementations for credit-sync.
//!
//! - Offline operation queue and sync engine
//! - Customer credit cache
pub mod cache;
pub mod sync;
