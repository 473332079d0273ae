//! [`IssueGateway`] backed by the tracker's command-line interface.
//!
//! Every call runs `<bin> [--db <path>] --json <args...>` in the repository
//! directory and parses stdout as JSON. Worktrees share one tracker directory
//! next to the git common dir, so the default database resolves there rather
//! than inside the current checkout.

use mergeclose_protocol::defaults::{
    DEFAULT_TRACKER_BIN, DEFAULT_TRACKER_DB_NAME, DEFAULT_TRACKER_DIR_NAME,
};
use mergeclose_protocol::process::{CommandOutput, CommandRunner, SystemCommandRunner};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::gateway::{GatewayError, IssueGateway};

const NOT_FOUND_NEEDLE: &str = "Issue not found";

/// Tracker directory shared by all worktrees of the repository at
/// `working_dir`: the parent of `git rev-parse --git-common-dir`, or
/// `working_dir` itself when git cannot answer.
pub fn resolve_shared_tracker_dir<R: CommandRunner + ?Sized>(
    runner: &mut R,
    working_dir: &Path,
) -> PathBuf {
    let args: Vec<String> = ["rev-parse", "--path-format=absolute", "--git-common-dir"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let common_dir = match runner.run("git", &args, working_dir) {
        Ok(output) if output.is_success() => {
            let trimmed = output.stdout.trim().to_string();
            (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
        }
        Ok(output) => {
            debug!(detail = %output.failure_detail(), "git common dir lookup failed");
            None
        }
        Err(err) => {
            debug!(error = %err, "git not available for common dir lookup");
            None
        }
    };
    match common_dir.as_deref().and_then(Path::parent) {
        Some(root) => root.join(DEFAULT_TRACKER_DIR_NAME),
        None => working_dir.join(DEFAULT_TRACKER_DIR_NAME),
    }
}

#[derive(Debug, Clone)]
pub struct TrackerCliConfig {
    pub tracker_bin: String,
    /// Passed as `--db`. Defaults to `<tracker_dir>/cache.db`.
    pub db_path: Option<PathBuf>,
    /// Directory the bootstrap import reads from.
    pub tracker_dir: PathBuf,
    pub working_dir: PathBuf,
}

impl TrackerCliConfig {
    pub fn new(working_dir: impl Into<PathBuf>, tracker_dir: impl Into<PathBuf>) -> Self {
        Self {
            tracker_bin: DEFAULT_TRACKER_BIN.to_string(),
            db_path: None,
            tracker_dir: tracker_dir.into(),
            working_dir: working_dir.into(),
        }
    }

    pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
        self.tracker_bin = bin.into();
        self
    }

    pub fn with_db_path(mut self, db_path: Option<PathBuf>) -> Self {
        self.db_path = db_path;
        self
    }

    fn effective_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.tracker_dir.join(DEFAULT_TRACKER_DB_NAME))
    }
}

pub struct CliIssueGateway<R: CommandRunner = SystemCommandRunner> {
    config: TrackerCliConfig,
    runner: R,
    bootstrapped: bool,
}

impl CliIssueGateway<SystemCommandRunner> {
    pub fn new(config: TrackerCliConfig) -> Self {
        Self::with_runner(config, SystemCommandRunner)
    }
}

impl<R: CommandRunner> CliIssueGateway<R> {
    pub fn with_runner(config: TrackerCliConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            bootstrapped: false,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "--db".to_string(),
            self.config.effective_db_path().display().to_string(),
        ]
    }

    fn invoke(&mut self, args: Vec<String>) -> Result<CommandOutput, GatewayError> {
        Ok(self
            .runner
            .run(&self.config.tracker_bin, &args, &self.config.working_dir)?)
    }

    fn run_json(&mut self, args: &[&str]) -> Result<Value, GatewayError> {
        let mut full = self.base_args();
        full.push("--json".to_string());
        full.extend(args.iter().map(|s| s.to_string()));

        let output = self.invoke(full)?;
        if !output.is_success() {
            return Err(GatewayError::Command {
                command: args.join(" "),
                detail: output.failure_detail(),
            });
        }
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(stdout).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    /// Populate the tracker database from its JSONL export. Runs at most once.
    fn bootstrap(&mut self) -> Result<(), GatewayError> {
        if self.bootstrapped {
            return Ok(());
        }
        let mut args = self.base_args();
        args.push("import".to_string());
        args.push("-i".to_string());
        args.push(self.config.tracker_dir.display().to_string());

        info!(tracker_dir = %self.config.tracker_dir.display(), "bootstrapping tracker database");
        let output = self.invoke(args)?;
        if !output.is_success() {
            return Err(GatewayError::Command {
                command: "import".to_string(),
                detail: format!("bootstrap import failed: {}", output.failure_detail()),
            });
        }
        self.bootstrapped = true;
        Ok(())
    }
}

impl<R: CommandRunner> IssueGateway for CliIssueGateway<R> {
    fn show_issue(&mut self, issue_id: &str) -> Result<Value, GatewayError> {
        match self.run_json(&["issue", "show", issue_id]) {
            Err(GatewayError::Command { detail, .. }) if detail.contains(NOT_FOUND_NEEDLE) => {
                self.bootstrap()?;
                self.run_json(&["issue", "show", issue_id])
            }
            other => other,
        }
    }

    fn set_issue_status(&mut self, issue_id: &str, status: &str) -> Result<(), GatewayError> {
        self.run_json(&["issue", "update", issue_id, "--status", status])
            .map(|_| ())
    }

    fn add_feedback(&mut self, issue_id: &str, content: &str) -> Result<(), GatewayError> {
        self.run_json(&["feedback", "add", issue_id, issue_id, "--content", content])
            .map(|_| ())
    }
}
