//! `mergeclose close`: one-shot close outside the daemon.
//!
//! Event mode previews a webhook payload (`--event-file`, dry-run only).
//! Operator mode takes the merge metadata as flags and, unless `--dry-run`,
//! runs the close state machine against the tracker CLI.

use anyhow::{Context, Result};
use clap::ArgGroup;
use mergeclose_closer::{
    dispatch_merge_close, preview_from_event, resolve_shared_tracker_dir, CliIssueGateway,
    DispatchOutcome, TrackerCliConfig,
};
use mergeclose_protocol::process::SystemCommandRunner;
use mergeclose_protocol::{build_operator_payload, CloseSource};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use crate::cli::error::HelpfulError;
use crate::cli::{load_config, print_json};

#[derive(Debug, clap::Args)]
#[command(group(ArgGroup::new("mode").required(true).args(["event_file", "issue_id"])))]
pub struct CloseArgs {
    /// Pull request event payload JSON (requires --dry-run)
    #[arg(long, conflicts_with_all = ["issue_id", "pr_url", "merge_sha", "merged_at"])]
    pub event_file: Option<PathBuf>,

    /// Tracker item to close (operator mode)
    #[arg(long, requires_all = ["pr_url", "merge_sha", "merged_at"])]
    pub issue_id: Option<String>,

    /// Merged PR URL (operator mode)
    #[arg(long, requires_all = ["issue_id", "merge_sha", "merged_at"])]
    pub pr_url: Option<String>,

    /// Merge commit SHA (operator mode)
    #[arg(long, requires_all = ["issue_id", "pr_url", "merged_at"])]
    pub merge_sha: Option<String>,

    /// Merge timestamp, ISO-8601 UTC (operator mode)
    #[arg(long, requires_all = ["issue_id", "pr_url", "merge_sha"])]
    pub merged_at: Option<String>,

    /// Close source: daemon, workflow or operator
    /// (default: workflow for events, operator otherwise)
    #[arg(long)]
    pub source: Option<CloseSource>,

    /// Validate and print the plan without touching the tracker
    #[arg(long)]
    pub dry_run: bool,

    /// Repository the tracker CLI runs in (default: config repo_dir)
    #[arg(long)]
    pub repo_dir: Option<PathBuf>,

    /// Tracker CLI binary (default: config tracker_bin)
    #[arg(long)]
    pub tracker_bin: Option<String>,

    /// Tracker database (default: <shared tracker dir>/cache.db)
    #[arg(long)]
    pub tracker_db: Option<PathBuf>,
}

pub fn run(args: CloseArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    match args.event_file.clone() {
        Some(path) => run_event(&args, &path),
        None => run_operator(args, config_path),
    }
}

fn run_event(args: &CloseArgs, path: &Path) -> Result<ExitCode> {
    if !args.dry_run {
        return Err(HelpfulError::new("--event-file mode requires --dry-run")
            .with_context("Webhook events are only previewed; the daemon applies merges")
            .with_suggestion("TRY: Add --dry-run, or use operator mode with --issue-id")
            .into());
    }
    let source = args.source.unwrap_or(CloseSource::Workflow);
    let event = load_event_file(path)?;
    let outcome = preview_from_event(&event, source);
    print_outcome(&outcome, true)?;
    Ok(ExitCode::SUCCESS)
}

fn run_operator(args: CloseArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let source = args.source.unwrap_or(CloseSource::Operator);
    if source == CloseSource::Workflow {
        return Err(HelpfulError::workflow_source_in_operator_mode().into());
    }
    let field = |value: &Option<String>| value.clone().unwrap_or_default();
    let payload = build_operator_payload(
        &field(&args.issue_id),
        &field(&args.pr_url),
        &field(&args.merge_sha),
        &field(&args.merged_at),
        source,
    )?;

    if args.dry_run {
        print_outcome(&DispatchOutcome::dry_run(payload), true)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(config_path)?;
    let repo_dir = args.repo_dir.unwrap_or(config.repo_dir);
    let tracker_dir = resolve_shared_tracker_dir(&mut SystemCommandRunner, &repo_dir);
    let tracker = TrackerCliConfig::new(repo_dir, tracker_dir)
        .with_bin(args.tracker_bin.unwrap_or(config.tracker_bin))
        .with_db_path(args.tracker_db.or(config.tracker_db));
    let mut gateway = CliIssueGateway::new(tracker);

    info!(issue_id = %payload.issue_id, pr_url = %payload.pr_url, "operator merge close");
    let outcome = dispatch_merge_close(&mut gateway, payload).context("merge close failed")?;
    print_outcome(&outcome, false)?;
    Ok(ExitCode::SUCCESS)
}

fn load_event_file(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| HelpfulError::event_file_unreadable(path, &e.to_string()))?;
    let event: Value = serde_json::from_str(&raw)
        .map_err(|e| HelpfulError::event_not_json(path, &e.to_string()))?;
    if !event.is_object() {
        return Err(HelpfulError::event_not_object().into());
    }
    Ok(event)
}

fn print_outcome(outcome: &DispatchOutcome, dry_run: bool) -> Result<()> {
    let mut value = serde_json::to_value(outcome)?;
    if dry_run {
        if let Value::Object(map) = &mut value {
            map.insert(
                "would_invoke_merge_closer".to_string(),
                Value::Bool(outcome.payload.is_some()),
            );
        }
    }
    print_json(&value)
}
