//! Output formatting for credit-sync.
//!
//! Commands return a [`String`] rendered either as colored text or as JSON.

mod json;
mod pretty;

pub use json::to_json;
pub use pretty::*;
