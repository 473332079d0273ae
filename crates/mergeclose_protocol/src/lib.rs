//! Merge-close shared data model.
//!
//! Types exchanged between the poller, the close state machine, the daemon
//! loop and the CLI. Everything that lands on disk (checkpoint, heartbeat) or
//! on the tracker (audit entries) is defined here so the shapes stay in one
//! place.

pub mod defaults;
pub mod event;
pub mod paths;
pub mod process;
pub mod replay;
pub mod state;
pub mod time;
pub mod types;

pub use event::{
    build_operator_payload, build_payload_from_event, extract_issue_id, PayloadError,
};
pub use replay::{replay_identity_key, repo_slug_from_pr_url, ReplayKey, ReplayKeyError};
pub use state::{CheckpointFile, CheckpointWindow, HeartbeatFile, ProcessedRecord};
pub use time::{Clock, SystemClock};
pub use types::{
    AuditEntry, CloseResult, ClosePayload, CloseSource, FeedbackMarker, MergeRecord,
    ParseCloseSourceError,
};
