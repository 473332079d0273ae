//! Health evaluation over the heartbeat file.
//!
//! Stateless apart from a small state file that counts consecutive failed
//! polls. The counter only moves when the heartbeat's `updated_at` changes,
//! so running the check more often than the daemon polls does not inflate it.

use chrono::{DateTime, Utc};
use mergeclose_protocol::time::parse_iso8601;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::atomic::write_json_atomic;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write health state {}: {source}", .path.display())]
    WriteState {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub reason: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_age_seconds: Option<i64>,
    pub consecutive_poll_failures: u32,
}

impl HealthReport {
    fn new(status: HealthStatus, reason: &str, age: Option<i64>, failures: u32) -> Self {
        let exit_code = match status {
            HealthStatus::Unhealthy => 1,
            HealthStatus::Healthy | HealthStatus::Degraded => 0,
        };
        Self {
            status,
            reason: reason.to_string(),
            exit_code,
            heartbeat_age_seconds: age,
            consecutive_poll_failures: failures,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct HealthState {
    #[serde(default)]
    last_heartbeat_updated_at: Option<String>,
    #[serde(default)]
    consecutive_poll_failures: u32,
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub heartbeat_max_age_secs: i64,
    pub failure_budget: u32,
}

fn load_state(path: &Path) -> HealthState {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "health state unreadable; starting over");
            HealthState::default()
        }),
        Err(_) => HealthState::default(),
    }
}

/// Evaluate daemon health at `now`.
///
/// Precedence: missing heartbeat, invalid heartbeat, safe mode, stale
/// heartbeat, exhausted failure budget, ok. Only the budget case is
/// `degraded`; it still exits 0.
pub fn evaluate_health(
    heartbeat_path: &Path,
    state_path: &Path,
    now: DateTime<Utc>,
    thresholds: &HealthThresholds,
) -> Result<HealthReport, HealthError> {
    let raw = match fs::read_to_string(heartbeat_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(HealthReport::new(HealthStatus::Unhealthy, "missing-heartbeat", None, 0));
        }
        Err(source) => {
            return Err(HealthError::Read {
                path: heartbeat_path.to_path_buf(),
                source,
            })
        }
    };

    let heartbeat: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
    let updated_at = heartbeat.get("updated_at").and_then(Value::as_str);
    let poll_ok = heartbeat.get("poll_ok").and_then(Value::as_bool);
    let safe_mode = heartbeat
        .get("safe_mode")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let (updated_at, updated_dt, poll_ok) =
        match (updated_at, updated_at.and_then(|s| parse_iso8601(s).ok()), poll_ok) {
            (Some(raw), Some(dt), Some(ok)) => (raw, dt, ok),
            _ => {
                return Ok(HealthReport::new(HealthStatus::Unhealthy, "invalid-heartbeat", None, 0));
            }
        };
    let age = (now - updated_dt).num_seconds();

    let mut state = load_state(state_path);
    if state.last_heartbeat_updated_at.as_deref() != Some(updated_at) {
        state.consecutive_poll_failures = if poll_ok {
            0
        } else {
            state.consecutive_poll_failures.saturating_add(1)
        };
        state.last_heartbeat_updated_at = Some(updated_at.to_string());
        write_json_atomic(state_path, &state).map_err(|source| HealthError::WriteState {
            path: state_path.to_path_buf(),
            source,
        })?;
    }
    let failures = state.consecutive_poll_failures;

    let report = if safe_mode {
        HealthReport::new(HealthStatus::Unhealthy, "safe-mode", Some(age), failures)
    } else if age > thresholds.heartbeat_max_age_secs {
        HealthReport::new(HealthStatus::Unhealthy, "stale-heartbeat", Some(age), failures)
    } else if failures >= thresholds.failure_budget.max(1) {
        HealthReport::new(
            HealthStatus::Degraded,
            "poll-failure-budget-exhausted",
            Some(age),
            failures,
        )
    } else {
        HealthReport::new(HealthStatus::Healthy, "ok", Some(age), failures)
    };
    Ok(report)
}
