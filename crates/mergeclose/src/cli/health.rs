//! `mergeclose health`: JSON health report, exit status from the report.

use anyhow::Result;
use chrono::Utc;
use mergeclose_daemon::{evaluate_health, HealthThresholds};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::cli::{load_config, print_json};

#[derive(Debug, clap::Args)]
pub struct HealthArgs {
    /// Heartbeat file written by the daemon (default: config heartbeat_path)
    #[arg(long, env = "MERGECLOSE_HEARTBEAT_PATH")]
    pub heartbeat_path: Option<PathBuf>,

    /// Failure-counter state file (default: config health_state_path)
    #[arg(long, env = "MERGECLOSE_HEALTH_STATE_PATH")]
    pub state_path: Option<PathBuf>,

    /// Heartbeat older than this is stale
    #[arg(long, env = "MERGECLOSE_HEARTBEAT_MAX_AGE_SECS")]
    pub max_age_secs: Option<i64>,

    /// Consecutive failed polls before reporting degraded
    #[arg(long, env = "MERGECLOSE_FAILURE_BUDGET")]
    pub failure_budget: Option<u32>,
}

pub fn run(args: HealthArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let heartbeat_path = args.heartbeat_path.unwrap_or(config.heartbeat_path);
    let state_path = args.state_path.unwrap_or(config.health_state_path);
    let thresholds = HealthThresholds {
        heartbeat_max_age_secs: args.max_age_secs.unwrap_or(config.heartbeat_max_age_secs),
        failure_budget: args.failure_budget.unwrap_or(config.failure_budget),
    };

    let report = evaluate_health(&heartbeat_path, &state_path, Utc::now(), &thresholds)?;
    print_json(&report)?;
    Ok(ExitCode::from(u8::try_from(report.exit_code).unwrap_or(1)))
}
