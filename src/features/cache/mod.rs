//! Credit balance cache.
//!
//! Serves customer credit balances to read paths, online or not.

mod credits;

pub use credits::{CacheEntry, Credit, CreditCache, CreditLookup, CreditSource};
