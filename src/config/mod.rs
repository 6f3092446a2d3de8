//! Configuration management for credit-sync.
//!
//! This module handles loading configuration from `~/.credit-sync/`.

mod paths;
mod settings;

pub use paths::{Paths, HOME_ENV};
pub use settings::{
    ApiConfig, CacheConfig, ColorSetting, Config, GeneralConfig, StorageConfig, SyncConfig,
};
