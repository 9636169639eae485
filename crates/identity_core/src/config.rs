//! Environment-driven core configuration.
//!
//! # Responsibility
//! - Resolve store location and logging settings from the process
//!   environment (or any key lookup, for tests).
//!
//! # Invariants
//! - Blank values are treated as unset.
//! - Logging is optional: no `IDENTITY_LOG_DIR` means no file logging.

use crate::logging::{default_log_level, init_logging};
use std::path::PathBuf;

pub const DB_PATH_ENV: &str = "IDENTITY_DB_PATH";
pub const LOG_LEVEL_ENV: &str = "IDENTITY_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "IDENTITY_LOG_DIR";
pub const DEFAULT_DB_FILE_NAME: &str = "identity.sqlite3";

/// Resolved core settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// SQLite file backing the contact store.
    pub db_path: PathBuf,
    /// One of `trace|debug|info|warn|error`.
    pub log_level: String,
    /// Absolute directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        Self {
            db_path: read(DB_PATH_ENV).map_or(defaults.db_path, PathBuf::from),
            log_level: read(LOG_LEVEL_ENV).unwrap_or(defaults.log_level),
            log_dir: read(LOG_DIR_ENV).map(PathBuf::from),
        }
    }

    /// Starts file logging when `log_dir` is configured.
    ///
    /// Returns `Ok(false)` when logging is not configured.
    pub fn init_logging(&self) -> Result<bool, String> {
        let Some(log_dir) = &self.log_dir else {
            return Ok(false);
        };
        let log_dir = log_dir
            .to_str()
            .ok_or_else(|| format!("log_dir `{}` is not valid UTF-8", log_dir.display()))?;
        init_logging(&self.log_level, log_dir)?;
        Ok(true)
    }
}
