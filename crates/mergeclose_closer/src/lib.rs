//! Merge-close state machine.
//!
//! Given a [`ClosePayload`](mergeclose_protocol::ClosePayload) and the
//! tracker's view of the linked item, decide whether the item may be closed
//! and apply the transition together with its audit trail. The tracker is
//! only reached through [`IssueGateway`].

pub mod closer;
pub mod dispatch;
pub mod gateway;
pub mod issue;
pub mod memory;
pub mod tracker_cli;

pub use closer::apply_merge_close;
pub use dispatch::{dispatch_merge_close, preview_from_event, DispatchOutcome};
pub use gateway::{GatewayError, IssueGateway};
pub use issue::{HistoryEntry, IssueView};
pub use memory::InMemoryGateway;
pub use tracker_cli::{resolve_shared_tracker_dir, CliIssueGateway, TrackerCliConfig};
