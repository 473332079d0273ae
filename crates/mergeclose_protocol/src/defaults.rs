//! Canonical default values shared by the daemon, the closer and the CLI.

/// Checkpoint schema accepted by this build. Anything else forces safe mode.
pub const CHECKPOINT_SCHEMA_VERSION: u64 = 1;

/// Watermark used when no checkpoint exists yet.
pub const DEFAULT_WATERMARK: &str = "1970-01-01T00:00:00Z";

pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 30.0;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_SECS: f64 = 1.0;
pub const DEFAULT_LOOKBACK_SECS: u64 = 3600;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

pub const DEFAULT_GH_BIN: &str = "gh";
pub const DEFAULT_TRACKER_BIN: &str = "sudocode";
pub const DEFAULT_TRACKER_DIR_NAME: &str = ".sudocode";
pub const DEFAULT_TRACKER_DB_NAME: &str = "cache.db";

pub const DEFAULT_HEARTBEAT_MAX_AGE_SECS: i64 = 120;
pub const DEFAULT_FAILURE_BUDGET: u32 = 3;

/// Tracker status an item must be in before a merge may close it.
pub const REVIEW_STATUS: &str = "needs_review";
pub const CLOSED_STATUS: &str = "closed";

/// Title prefix marking a corrective follow-up item.
pub const FIX_TITLE_PREFIX: &str = "[FIX]";

pub const SAFE_MODE_OPERATOR_ACTION: &str =
    "repair checkpoint file and restart daemon; use operator fallback for missed merge events";
