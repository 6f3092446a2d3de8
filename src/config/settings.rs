//! Configuration settings for credit-sync.
//!
//! Settings are loaded from `~/.credit-sync/config.yaml`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::SyncError;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Remote API settings.
    pub api: ApiConfig,
    /// Offline queue and sync settings.
    pub sync: SyncConfig,
    /// Credit balance cache settings.
    pub cache: CacheConfig,
    /// Device storage settings.
    pub storage: StorageConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    /// Color output setting.
    #[serde(default = "default_color")]
    pub color: ColorSetting,
}

/// Color output setting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorSetting {
    /// Auto-detect based on terminal.
    #[default]
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the store-credit API, e.g. `https://app.example.com/api`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Shop identifier; namespaces all device-local storage.
    #[serde(default = "default_shop")]
    pub shop: String,
}

/// Offline queue and sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Failed attempts after which a retryable record becomes FAILED.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum number of records held in the active queue.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Completed records kept for "recently synced" display.
    #[serde(default = "default_retain_completed")]
    pub retain_completed: usize,
    /// Seconds between periodic sync triggers.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

/// Credit balance cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Age in seconds after which an entry is stale for online reads.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Customers kept in the cache; the least recently fetched go first.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Device storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Largest value, in bytes, a single key may hold. `None` is unlimited.
    pub quota_bytes: Option<usize>,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

const fn default_color() -> ColorSetting {
    ColorSetting::Auto
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_shop() -> String {
    "default".to_string()
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_max_queue_size() -> usize {
    100
}

const fn default_retain_completed() -> usize {
    20
}

const fn default_interval_secs() -> u64 {
    60
}

const fn default_max_age_secs() -> u64 {
    300
}

const fn default_max_entries() -> usize {
    200
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
            color: default_color(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            shop: default_shop(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_queue_size: default_max_queue_size(),
            retain_completed: default_retain_completed(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl SyncConfig {
    /// Periodic trigger interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    /// Staleness threshold as a chrono duration.
    #[must_use]
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.max_age_secs).unwrap_or(i64::MAX))
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Reject settings the queue cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` naming the offending field.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.sync.max_retries == 0 {
            return Err(SyncError::Config("sync.max_retries must be at least 1".to_string()));
        }
        if self.sync.max_queue_size == 0 {
            return Err(SyncError::Config(
                "sync.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(SyncError::Config(
                "sync.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(SyncError::Config(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }
        match reqwest::Url::parse(&self.api.base_url) {
            Ok(url) if !url.cannot_be_a_base() => {}
            _ => {
                return Err(SyncError::Config(format!(
                    "api.base_url is not a usable URL: {}",
                    self.api.base_url
                )))
            }
        }
        if self.api.shop.trim().is_empty() {
            return Err(SyncError::Config("api.shop must not be empty".to_string()));
        }
        Ok(())
    }
}
