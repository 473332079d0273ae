//! Merge-close daemon.
//!
//! Polls the upstream source for merged changes, deduplicates them against a
//! crash-recoverable checkpoint and dispatches each new merge to the close
//! state machine. One instance per checkpoint, enforced by a pid lock file.

pub mod atomic;
pub mod checkpoint;
pub mod config;
pub mod daemon;
pub mod health;
pub mod heartbeat;
pub mod lock;
pub mod poller;
pub mod retry;

pub use checkpoint::{CheckpointError, CheckpointState, CheckpointStore};
pub use config::{ConfigError, DaemonConfig, PaginationMode};
pub use daemon::{DaemonError, DaemonSettings, MergeCloseDaemon, PollCycleOutcome};
pub use health::{evaluate_health, HealthError, HealthReport, HealthStatus, HealthThresholds};
pub use heartbeat::write_heartbeat;
pub use lock::{InstanceLock, LockError};
pub use poller::{FetchError, GhCliPoller, MergeSource};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
