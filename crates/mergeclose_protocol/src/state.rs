//! On-disk documents owned by the daemon: checkpoint and heartbeat.
//!
//! Both decode strictly (`deny_unknown_fields`) so a hand-edited or foreign
//! file is caught at load time instead of being silently reinterpreted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One processed merge, keyed by its replay identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessedRecord {
    pub pr_number: u64,
    pub merged_at: String,
    pub pr_url: String,
    pub issue_id: String,
    pub merge_sha: String,
    pub replay_key: String,
    pub processed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointWindow {
    pub watermark_merged_at: String,
}

/// Checkpoint file layout (schema version 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointFile {
    pub schema_version: u64,
    #[serde(default)]
    pub safe_mode: bool,
    #[serde(default)]
    pub safe_mode_reason: String,
    /// Absent in files written before the window was introduced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<CheckpointWindow>,
    pub processed: BTreeMap<String, ProcessedRecord>,
}

/// Liveness signal rewritten at the end of every poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatFile {
    pub updated_at: String,
    pub safe_mode: bool,
    pub safe_mode_reason: String,
    pub operator_action: String,
    pub poll_ok: bool,
}
