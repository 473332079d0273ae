//! The polling loop.
//!
//! One cycle: fetch with bounded retry, dedupe against the checkpoint,
//! dispatch each new merge to the close state machine, advance the watermark,
//! save the checkpoint, write the heartbeat. Everything runs on the calling
//! thread, one record at a time, in `(mergedAt, number)` order.
//!
//! The checkpoint is saved once per cycle, not per record. A crash mid-cycle
//! re-dispatches that cycle's records on restart; the close state machine's
//! already-closed rule makes that harmless.

use chrono::{DateTime, Utc};
use mergeclose_closer::{dispatch_merge_close, IssueGateway};
use mergeclose_protocol::time::{format_iso8601, parse_iso8601, subtract_lookback};
use mergeclose_protocol::{
    build_payload_from_event, replay_identity_key, Clock, CloseSource, MergeRecord,
    ProcessedRecord, SystemClock,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointState, CheckpointStore};
use crate::config::DaemonConfig;
use crate::heartbeat::{build_heartbeat, write_heartbeat};
use crate::lock::{InstanceLock, LockError};
use crate::poller::MergeSource;
use crate::retry::{with_backoff, RetryPolicy, Sleeper, ThreadSleeper};

/// Longest uninterrupted nap between stop-flag checks.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to write heartbeat {}: {source}", .path.display())]
    Heartbeat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollCycleOutcome {
    pub safe_mode: bool,
    pub poll_ok: bool,
    pub dispatched: u32,
    pub skipped: u32,
    pub retries: u32,
}

impl PollCycleOutcome {
    fn safe_mode() -> Self {
        Self {
            safe_mode: true,
            poll_ok: false,
            dispatched: 0,
            skipped: 0,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub checkpoint_path: PathBuf,
    pub lock_path: PathBuf,
    pub heartbeat_path: PathBuf,
    pub retry: RetryPolicy,
    pub lookback_secs: u64,
}

impl DaemonSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            checkpoint_path: config.checkpoint_path.clone(),
            lock_path: config.lock_path.clone(),
            heartbeat_path: config.heartbeat_path.clone(),
            retry: RetryPolicy::new(config.retry_attempts, config.retry_backoff_secs),
            lookback_secs: config.lookback_secs,
        }
    }
}

/// A running daemon instance. It owns the single-instance lock from
/// construction until [`release`](Self::release) or drop.
pub struct MergeCloseDaemon<S: MergeSource, G: IssueGateway> {
    lock: InstanceLock,
    store: CheckpointStore,
    heartbeat_path: PathBuf,
    retry: RetryPolicy,
    lookback_secs: u64,
    source: S,
    gateway: G,
    clock: Box<dyn Clock>,
    sleeper: Box<dyn Sleeper>,
    state: CheckpointState,
}

impl<S: MergeSource, G: IssueGateway> MergeCloseDaemon<S, G> {
    /// Take the instance lock, then load the checkpoint and, unless it put us
    /// in safe mode, rewrite it in canonical form.
    ///
    /// The checkpoint is not read or written until the lock is held, so a
    /// second instance fails with [`LockError::AlreadyRunning`] and leaves
    /// the live daemon's files alone. A failed rewrite is fatal: the daemon
    /// cannot persist progress.
    pub fn new(settings: DaemonSettings, source: S, gateway: G) -> Result<Self, DaemonError> {
        let lock = InstanceLock::acquire(&settings.lock_path)?;
        let store = CheckpointStore::new(settings.checkpoint_path);
        let state = store.load();
        if state.safe_mode {
            warn!(reason = %state.safe_mode_reason, "daemon starting in safe mode");
        } else {
            store.save(&state)?;
        }
        Ok(Self {
            lock,
            store,
            heartbeat_path: settings.heartbeat_path,
            retry: settings.retry,
            lookback_secs: settings.lookback_secs,
            source,
            gateway,
            clock: Box::new(SystemClock),
            sleeper: Box::new(ThreadSleeper),
            state,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn is_safe_mode(&self) -> bool {
        self.state.safe_mode
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn checkpoint_path(&self) -> &Path {
        self.store.path()
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Remove the lock file, reporting a failure the drop path would only log.
    pub fn release(self) -> Result<(), DaemonError> {
        self.lock.release()?;
        Ok(())
    }

    /// Poll every `interval` until `stop` is set. Cycle errors are logged and
    /// the loop continues. The lock stays held until the daemon is released.
    pub fn run_forever(&mut self, interval: Duration, stop: &AtomicBool) {
        info!(interval_secs = interval.as_secs_f64(), "merge-close daemon started");
        while !stop.load(Ordering::SeqCst) {
            if let Err(err) = self.poll_once() {
                error!(error = %err, "poll cycle failed");
            }
            self.sleep_until_stopped(interval, stop);
        }
        info!("merge-close daemon stopping");
    }

    fn sleep_until_stopped(&mut self, interval: Duration, stop: &AtomicBool) {
        let mut remaining = interval;
        while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
            let nap = remaining.min(STOP_CHECK_SLICE);
            self.sleeper.sleep(nap);
            remaining = remaining.saturating_sub(nap);
        }
    }

    /// Run one cycle. The heartbeat is written on every path; a checkpoint
    /// save failure is returned after it.
    pub fn poll_once(&mut self) -> Result<PollCycleOutcome, DaemonError> {
        let (outcome, saved) = if self.state.safe_mode {
            debug!("safe mode: skipping fetch and dispatch");
            (PollCycleOutcome::safe_mode(), Ok(()))
        } else {
            let outcome = self.run_cycle();
            (outcome, self.store.save(&self.state))
        };

        let heartbeat = build_heartbeat(self.clock.now_iso(), &self.state, outcome.poll_ok);
        let written = write_heartbeat(&self.heartbeat_path, &heartbeat);

        saved?;
        written.map_err(|source| DaemonError::Heartbeat {
            path: self.heartbeat_path.clone(),
            source,
        })?;
        Ok(outcome)
    }

    fn run_cycle(&mut self) -> PollCycleOutcome {
        let since = subtract_lookback(self.state.watermark, self.lookback_secs);
        debug!(since = %format_iso8601(since), "poll cycle starting");

        let source = &mut self.source;
        let fetched = with_backoff(&self.retry, self.sleeper.as_mut(), |attempt| {
            debug!(attempt, "fetching merged changes");
            source.fetch(since)
        });
        let retries = fetched.retries;
        let records = match fetched.result {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, retries, "fetch failed; watermark unchanged");
                return PollCycleOutcome {
                    safe_mode: false,
                    poll_ok: false,
                    dispatched: 0,
                    skipped: 0,
                    retries,
                };
            }
        };

        let mut dispatched = 0;
        let mut skipped = 0;
        let mut max_seen: Option<DateTime<Utc>> = None;
        for record in &records {
            if let Ok(merged_at) = parse_iso8601(&record.merged_at) {
                max_seen = max_seen.max(Some(merged_at));
            }
            if self.process_record(record) {
                dispatched += 1;
            } else {
                skipped += 1;
            }
        }
        if let Some(max_seen) = max_seen {
            self.state.advance_watermark(max_seen);
        }

        info!(
            fetched = records.len(),
            dispatched,
            skipped,
            retries,
            watermark = %format_iso8601(self.state.watermark),
            "poll cycle complete"
        );
        PollCycleOutcome {
            safe_mode: false,
            poll_ok: true,
            dispatched,
            skipped,
            retries,
        }
    }

    /// Dispatch one record. Returns whether it was recorded as processed.
    fn process_record(&mut self, record: &MergeRecord) -> bool {
        let pr_number = record.number;
        let Some(event) = record.to_event() else {
            debug!(pr_number, "skipping incomplete record");
            return false;
        };
        let payload = match build_payload_from_event(&event, CloseSource::Daemon) {
            Ok(payload) => payload,
            Err(err) => {
                info!(pr_number, reason = %err, "skipping merge without a valid close payload");
                return false;
            }
        };
        let key = match replay_identity_key(&payload.pr_url, pr_number, &payload.merge_sha) {
            Ok(key) => key,
            Err(err) => {
                info!(pr_number, reason = %err, "skipping merge without a replay key");
                return false;
            }
        };
        if self.state.contains(&key) {
            debug!(replay_key = %key, "already processed");
            return false;
        }

        let processed = ProcessedRecord {
            pr_number,
            merged_at: payload.merged_at.clone(),
            pr_url: payload.pr_url.clone(),
            issue_id: payload.issue_id.clone(),
            merge_sha: payload.merge_sha.clone(),
            replay_key: key.to_string(),
            processed_at: String::new(),
        };

        let outcome = match dispatch_merge_close(&mut self.gateway, payload) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(replay_key = %key, error = %err, "dispatch failed; will retry next cycle");
                return false;
            }
        };
        if outcome.result.as_ref().is_some_and(|r| r.is_not_in_review()) {
            info!(replay_key = %key, issue_id = %processed.issue_id, "issue not in review yet; not recorded");
            return false;
        }

        info!(
            replay_key = %key,
            issue_id = %processed.issue_id,
            applied = outcome.result.as_ref().map(|r| r.applied).unwrap_or(false),
            "merge dispatched"
        );
        self.state.record(ProcessedRecord {
            processed_at: self.clock.now_iso(),
            ..processed
        });
        true
    }
}
