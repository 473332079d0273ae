use std::path::PathBuf;

/// Resolve the mergeclose runtime home.
///
/// Priority:
/// 1) MERGECLOSE_HOME
/// 2) the user's home directory
/// 3) ./.mergeclose
pub fn mergeclose_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("MERGECLOSE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mergeclose")
}

/// Default checkpoint path: ~/.mergeclose/merge-close-checkpoint.json
pub fn default_checkpoint_path() -> PathBuf {
    mergeclose_home().join("merge-close-checkpoint.json")
}

/// Default lock path: ~/.mergeclose/merge-close-daemon.lock
pub fn default_lock_path() -> PathBuf {
    mergeclose_home().join("merge-close-daemon.lock")
}

/// Default heartbeat path: ~/.mergeclose/merge-close-heartbeat.json
pub fn default_heartbeat_path() -> PathBuf {
    mergeclose_home().join("merge-close-heartbeat.json")
}

/// Default health-check state path: ~/.mergeclose/merge-close-health-state.json
pub fn default_health_state_path() -> PathBuf {
    mergeclose_home().join("merge-close-health-state.json")
}

/// Default daemon config path: ~/.mergeclose/daemon.toml
pub fn default_config_path() -> PathBuf {
    mergeclose_home().join("daemon.toml")
}

/// Default logs directory: ~/.mergeclose/logs
pub fn default_logs_dir() -> PathBuf {
    mergeclose_home().join("logs")
}
