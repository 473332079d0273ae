//! Daemon configuration.
//!
//! Loaded from TOML (`~/.mergeclose/daemon.toml` by default). Every field has
//! a default so an empty or missing file is a valid configuration.

use mergeclose_protocol::defaults::{
    DEFAULT_FAILURE_BUDGET, DEFAULT_GH_BIN, DEFAULT_HEARTBEAT_MAX_AGE_SECS, DEFAULT_LOOKBACK_SECS,
    DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_BACKOFF_SECS, DEFAULT_TRACKER_BIN,
};
use mergeclose_protocol::paths;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to render config: {0}")]
    Render(String),
}

/// How far the poller pages back on each fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// Stop at the first record older than the fetch-since timestamp. Only
    /// sound for a listing ordered by merge time; the GitHub listing is
    /// ordered by last update, so a freshly touched old merge hides newer ones.
    Watermark,
    /// Walk every page; only filter by timestamp.
    #[default]
    Exhaustive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default = "paths::default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    #[serde(default = "paths::default_lock_path")]
    pub lock_path: PathBuf,

    #[serde(default = "paths::default_heartbeat_path")]
    pub heartbeat_path: PathBuf,

    /// State file for the health check's failure counter
    #[serde(default = "paths::default_health_state_path")]
    pub health_state_path: PathBuf,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: f64,

    /// Subtracted from the watermark when computing fetch-since
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub pagination: PaginationMode,

    #[serde(default = "default_gh_bin")]
    pub gh_bin: String,

    #[serde(default = "default_tracker_bin")]
    pub tracker_bin: String,

    /// Tracker database; defaults to the shared tracker dir's cache.db
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_db: Option<PathBuf>,

    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,

    #[serde(default = "default_heartbeat_max_age")]
    pub heartbeat_max_age_secs: i64,

    #[serde(default = "default_failure_budget")]
    pub failure_budget: u32,
}

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_backoff() -> f64 {
    DEFAULT_RETRY_BACKOFF_SECS
}

fn default_lookback() -> u64 {
    DEFAULT_LOOKBACK_SECS
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_gh_bin() -> String {
    DEFAULT_GH_BIN.to_string()
}

fn default_tracker_bin() -> String {
    DEFAULT_TRACKER_BIN.to_string()
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_heartbeat_max_age() -> i64 {
    DEFAULT_HEARTBEAT_MAX_AGE_SECS
}

fn default_failure_budget() -> u32 {
    DEFAULT_FAILURE_BUDGET
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: paths::default_checkpoint_path(),
            lock_path: paths::default_lock_path(),
            heartbeat_path: paths::default_heartbeat_path(),
            health_state_path: paths::default_health_state_path(),
            poll_interval_secs: default_poll_interval(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            lookback_secs: default_lookback(),
            page_size: default_page_size(),
            pagination: PaginationMode::default(),
            gh_bin: default_gh_bin(),
            tracker_bin: default_tracker_bin(),
            tracker_db: None,
            repo_dir: default_repo_dir(),
            heartbeat_max_age_secs: default_heartbeat_max_age(),
            failure_budget: default_failure_budget(),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: DaemonConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(config.normalized())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))
    }

    /// Clamp values into their usable ranges.
    pub fn normalized(mut self) -> Self {
        self.retry_attempts = self.retry_attempts.max(1);
        self.page_size = self.page_size.max(1);
        if !self.retry_backoff_secs.is_finite() || self.retry_backoff_secs < 0.0 {
            self.retry_backoff_secs = 0.0;
        }
        if !self.poll_interval_secs.is_finite() || self.poll_interval_secs < 0.0 {
            self.poll_interval_secs = 0.0;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs.clamp(0.0, 86_400.0))
    }
}
