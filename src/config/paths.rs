//! Path resolution for credit-sync configuration and data files.
//!
//! All data is stored in `~/.credit-sync/` unless `CREDIT_SYNC_HOME` points
//! elsewhere:
//! - `config.yaml` - Main configuration file
//! - `credit-sync.db` - `SQLite` database holding the queue and credit cache

use std::path::PathBuf;

use crate::error::SyncError;

/// Environment variable overriding the data root.
pub const HOME_ENV: &str = "CREDIT_SYNC_HOME";

/// Paths to credit-sync configuration and data files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.credit-sync/`
    pub root: PathBuf,
    /// Config file: `~/.credit-sync/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.credit-sync/credit-sync.db`
    pub database: PathBuf,
}

impl Paths {
    /// Resolve paths from `CREDIT_SYNC_HOME` or the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if neither variable is set.
    pub fn new() -> Result<Self, SyncError> {
        if let Ok(root) = std::env::var(HOME_ENV) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }

        let home = std::env::var("HOME")
            .map_err(|_| SyncError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".credit-sync")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("credit-sync.db"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), SyncError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                SyncError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }

        Ok(())
    }
}
