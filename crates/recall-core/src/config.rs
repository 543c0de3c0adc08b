use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorCode;
use crate::purge::PurgePolicy;
use crate::sync::{DEFAULT_CALLER_ID, SyncOptions};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default)]
    pub purge: PurgeConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeConfig {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u32,
    #[serde(default = "default_min_age_minutes")]
    pub min_age_minutes: u32,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            min_age_minutes: default_min_age_minutes(),
        }
    }
}

impl PurgeConfig {
    #[must_use]
    pub fn policy(&self) -> PurgePolicy {
        PurgePolicy {
            interval_ms: i64::from(self.interval_hours) * 60 * 60 * 1000,
            min_age_ms: i64::from(self.min_age_minutes) * 60 * 1000,
        }
    }
}

/// Bound on the retained set. Unset keeps every retraction forever.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retained: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite store file. Defaults to `<data_dir>/recall/store.sqlite3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_caller_id")]
    pub caller_id: String,
    #[serde(default = "default_caller_id")]
    pub allowed_caller: String,
    #[serde(default)]
    pub write_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_hydrate_timeout_ms")]
    pub hydrate_timeout_ms: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            caller_id: default_caller_id(),
            allowed_caller: default_caller_id(),
            write_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            hydrate_timeout_ms: default_hydrate_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            caller_id: self.caller_id.clone(),
            write_retries: self.write_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            hydrate_timeout: Duration::from_millis(self.hydrate_timeout_ms),
        }
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Configured store path, else the platform data directory, else the
    /// working directory.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("recall/store.sqlite3")
        })
    }
}

/// `<config_dir>/recall/config.toml`, if the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("recall/config.toml"))
}

/// A config file that exists but does not parse.
#[derive(Debug, thiserror::Error)]
#[error("Failed to parse {}", path.display())]
pub struct ConfigParseError {
    pub path: PathBuf,
    #[source]
    source: toml::de::Error,
}

impl ConfigParseError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ConfigParseError
    }
}

/// Load config from `path`. A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, or a
/// [`ConfigParseError`] if it cannot be parsed.
pub fn load_config(path: &Path) -> Result<RecallConfig> {
    if !path.exists() {
        return Ok(RecallConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<RecallConfig>(&content).map_err(|source| {
        ConfigParseError {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

const fn default_interval_hours() -> u32 {
    24
}

const fn default_min_age_minutes() -> u32 {
    10
}

fn default_caller_id() -> String {
    DEFAULT_CALLER_ID.to_string()
}

const fn default_retry_backoff_ms() -> u64 {
    50
}

const fn default_hydrate_timeout_ms() -> u64 {
    2_000
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}
