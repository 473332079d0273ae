//! Checkpoint persistence.
//!
//! The checkpoint records the watermark and every processed replay key. A
//! file that fails validation is never repaired or overwritten here; the
//! daemon enters safe mode and an operator has to replace it.

use chrono::{DateTime, Utc};
use mergeclose_protocol::defaults::CHECKPOINT_SCHEMA_VERSION;
use mergeclose_protocol::time::{format_iso8601, parse_iso8601};
use mergeclose_protocol::{CheckpointFile, CheckpointWindow, ProcessedRecord, ReplayKey};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

use crate::atomic::write_json_atomic;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Malformed(String),

    #[error("unsupported checkpoint schema version {0}")]
    UnsupportedSchema(u64),
}

/// In-memory checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointState {
    pub safe_mode: bool,
    pub safe_mode_reason: String,
    pub watermark: DateTime<Utc>,
    pub processed: BTreeMap<String, ProcessedRecord>,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            safe_mode: false,
            safe_mode_reason: String::new(),
            // DateTime<Utc>::default() is the Unix epoch.
            watermark: DateTime::<Utc>::default(),
            processed: BTreeMap::new(),
        }
    }
}

impl CheckpointState {
    pub fn halted(reason: impl Into<String>) -> Self {
        Self {
            safe_mode: true,
            safe_mode_reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn contains(&self, key: &ReplayKey) -> bool {
        self.processed.contains_key(key.as_str())
    }

    pub fn record(&mut self, record: ProcessedRecord) {
        self.processed.insert(record.replay_key.clone(), record);
    }

    /// Advance the watermark. Never moves it backwards.
    pub fn advance_watermark(&mut self, candidate: DateTime<Utc>) {
        if candidate > self.watermark {
            self.watermark = candidate;
        }
    }

    pub fn to_file(&self) -> CheckpointFile {
        CheckpointFile {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            safe_mode: self.safe_mode,
            safe_mode_reason: self.safe_mode_reason.clone(),
            window: Some(CheckpointWindow {
                watermark_merged_at: format_iso8601(self.watermark),
            }),
            processed: self.processed.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint, folding every failure into safe mode.
    pub fn load(&self) -> CheckpointState {
        match self.read() {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(path = %self.path.display(), "no checkpoint; starting empty");
                CheckpointState::default()
            }
            Err(err) => {
                error!(path = %self.path.display(), error = %err, "checkpoint rejected; entering safe mode");
                CheckpointState::halted(err.to_string())
            }
        }
    }

    /// Read and validate the checkpoint. `Ok(None)` when the file is absent.
    pub fn read(&self) -> Result<Option<CheckpointState>, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        parse_checkpoint(&raw).map(Some)
    }

    pub fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        write_json_atomic(&self.path, &state.to_file()).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), processed = state.processed.len(), "checkpoint saved");
        Ok(())
    }
}

fn malformed(msg: impl Into<String>) -> CheckpointError {
    CheckpointError::Malformed(msg.into())
}

/// Validate in order: JSON, object, schema version, `processed` shape, the
/// strict schema, then the watermark timestamp.
pub fn parse_checkpoint(raw: &str) -> Result<CheckpointState, CheckpointError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| malformed(format!("checkpoint is not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| malformed("checkpoint payload must be an object"))?;

    let version = match object.get("schema_version") {
        None => return Err(malformed("checkpoint schema_version is missing")),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| malformed("checkpoint schema_version must be a non-negative integer"))?,
    };
    if version != CHECKPOINT_SCHEMA_VERSION {
        return Err(CheckpointError::UnsupportedSchema(version));
    }

    if !matches!(object.get("processed"), Some(Value::Object(_))) {
        return Err(malformed("checkpoint processed must be an object"));
    }

    let file: CheckpointFile = serde_json::from_value(value)
        .map_err(|e| malformed(format!("checkpoint does not match schema: {}", e)))?;

    let watermark = match &file.window {
        None => DateTime::<Utc>::default(),
        Some(window) => parse_iso8601(&window.watermark_merged_at)
            .map_err(|e| malformed(format!("checkpoint watermark: {}", e)))?,
    };

    Ok(CheckpointState {
        safe_mode: file.safe_mode,
        safe_mode_reason: file.safe_mode_reason,
        watermark,
        processed: file.processed,
    })
}
