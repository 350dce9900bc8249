//! Messenger configuration loaded from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hush_store::database::DEFAULT_BUSY_TIMEOUT;
use hush_store::Database;

/// Messenger configuration.
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Location of the local replica.
    /// Env: `HUSH_DB_PATH`
    /// Default: platform data directory, `hush.db`.
    pub db_path: PathBuf,

    /// How long a write waits for a concurrent writer.
    /// Env: `HUSH_BUSY_TIMEOUT_MS`
    /// Default: 5 seconds.
    pub busy_timeout: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        let db_path = match Database::default_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "No data directory, using ./hush.db");
                PathBuf::from("hush.db")
            }
        };

        Self {
            db_path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl MessengerConfig {
    /// Configuration for a replica at an explicit path.
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("HUSH_DB_PATH") {
            if path.is_empty() {
                tracing::warn!("Empty HUSH_DB_PATH, using default");
            } else {
                config.db_path = PathBuf::from(path);
            }
        }

        if let Ok(val) = std::env::var("HUSH_BUSY_TIMEOUT_MS") {
            match parse_millis(&val) {
                Some(timeout) => config.busy_timeout = timeout,
                None => {
                    tracing::warn!(value = %val, "Invalid HUSH_BUSY_TIMEOUT_MS, using default");
                }
            }
        }

        config
    }
}

fn parse_millis(val: &str) -> Option<Duration> {
    val.trim().parse::<u64>().ok().map(Duration::from_millis)
}
