//! `mergeclose daemon`: run the poller until SIGINT/SIGTERM.

use anyhow::Result;
use mergeclose_closer::{resolve_shared_tracker_dir, CliIssueGateway, TrackerCliConfig};
use mergeclose_daemon::{
    DaemonConfig, DaemonError, DaemonSettings, GhCliPoller, LockError, MergeCloseDaemon,
    PaginationMode,
};
use mergeclose_protocol::process::SystemCommandRunner;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::cli::error::HelpfulError;
use crate::cli::{load_config, print_json};

/// Every option overrides the config file and can also be set through the
/// matching `MERGECLOSE_*` environment variable.
#[derive(Debug, clap::Args)]
pub struct DaemonArgs {
    /// Run a single poll cycle, print its outcome as JSON and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between poll cycles
    #[arg(long, env = "MERGECLOSE_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<f64>,

    /// Repository to poll (default: config repo_dir)
    #[arg(long, env = "MERGECLOSE_REPO_DIR")]
    pub repo_dir: Option<PathBuf>,

    #[arg(long, env = "MERGECLOSE_CHECKPOINT_PATH")]
    pub checkpoint_path: Option<PathBuf>,

    #[arg(long, env = "MERGECLOSE_LOCK_PATH")]
    pub lock_path: Option<PathBuf>,

    #[arg(long, env = "MERGECLOSE_HEARTBEAT_PATH")]
    pub heartbeat_path: Option<PathBuf>,

    /// Fetch attempts per cycle before giving up until the next one
    #[arg(long, env = "MERGECLOSE_RETRY_ATTEMPTS")]
    pub retry_attempts: Option<u32>,

    /// Base backoff in seconds; doubles after each failed attempt
    #[arg(long, env = "MERGECLOSE_RETRY_BACKOFF_SECS")]
    pub retry_backoff_secs: Option<f64>,

    /// Seconds subtracted from the watermark when fetching
    #[arg(long, env = "MERGECLOSE_LOOKBACK_SECS")]
    pub lookback_secs: Option<u64>,

    /// Pull requests requested per GitHub page
    #[arg(long, env = "MERGECLOSE_PAGE_SIZE")]
    pub page_size: Option<u32>,

    /// exhaustive (walk every page) or watermark (stop at the first older merge)
    #[arg(long, env = "MERGECLOSE_PAGINATION")]
    pub pagination: Option<String>,

    /// GitHub CLI executable
    #[arg(long, env = "MERGECLOSE_GH_BIN")]
    pub gh_bin: Option<String>,

    /// Tracker CLI executable
    #[arg(long, env = "MERGECLOSE_TRACKER_BIN")]
    pub tracker_bin: Option<String>,

    #[arg(long, env = "MERGECLOSE_TRACKER_DB")]
    pub tracker_db: Option<PathBuf>,
}

impl DaemonArgs {
    fn apply(self, mut config: DaemonConfig) -> Result<DaemonConfig> {
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval_secs = secs;
        }
        if let Some(dir) = self.repo_dir {
            config.repo_dir = dir;
        }
        if let Some(path) = self.checkpoint_path {
            config.checkpoint_path = path;
        }
        if let Some(path) = self.lock_path {
            config.lock_path = path;
        }
        if let Some(path) = self.heartbeat_path {
            config.heartbeat_path = path;
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(secs) = self.retry_backoff_secs {
            config.retry_backoff_secs = secs;
        }
        if let Some(secs) = self.lookback_secs {
            config.lookback_secs = secs;
        }
        if let Some(size) = self.page_size {
            config.page_size = size;
        }
        if let Some(mode) = self.pagination {
            config.pagination = parse_pagination(&mode)?;
        }
        if let Some(bin) = self.gh_bin {
            config.gh_bin = bin;
        }
        if let Some(bin) = self.tracker_bin {
            config.tracker_bin = bin;
        }
        if self.tracker_db.is_some() {
            config.tracker_db = self.tracker_db;
        }
        Ok(config.normalized())
    }
}

fn parse_pagination(raw: &str) -> Result<PaginationMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "watermark" => Ok(PaginationMode::Watermark),
        "exhaustive" => Ok(PaginationMode::Exhaustive),
        other => Err(HelpfulError::new(format!("Unknown pagination mode: '{}'", other))
            .with_suggestion("TRY: --pagination exhaustive or --pagination watermark")
            .into()),
    }
}

pub fn run(args: DaemonArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let once = args.once;
    let config = args.apply(load_config(config_path)?)?;

    let poller = GhCliPoller::new(config.repo_dir.clone())
        .gh_bin(config.gh_bin.clone())
        .page_size(config.page_size)
        .pagination(config.pagination);
    let tracker_dir = resolve_shared_tracker_dir(&mut SystemCommandRunner, &config.repo_dir);
    let gateway = CliIssueGateway::new(
        TrackerCliConfig::new(config.repo_dir.clone(), tracker_dir)
            .with_bin(config.tracker_bin.clone())
            .with_db_path(config.tracker_db.clone()),
    );

    // Takes the lock before the checkpoint is read.
    let mut daemon = MergeCloseDaemon::new(DaemonSettings::from_config(&config), poller, gateway)
        .map_err(|e| explain(e, &config))?;

    if once {
        let outcome = daemon.poll_once().map_err(|e| explain(e, &config))?;
        daemon.release()?;
        print_json(&outcome)?;
        return Ok(ExitCode::SUCCESS);
    }

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&shutdown_flag))?;

    info!(
        repo_dir = %config.repo_dir.display(),
        checkpoint = %config.checkpoint_path.display(),
        "starting merge-close daemon"
    );
    daemon.run_forever(config.poll_interval(), &shutdown_flag);
    daemon.release()?;
    Ok(ExitCode::SUCCESS)
}

fn explain(err: DaemonError, config: &DaemonConfig) -> anyhow::Error {
    match err {
        DaemonError::Lock(LockError::AlreadyRunning { pid, .. }) => {
            HelpfulError::daemon_already_running(pid, &config.lock_path).into()
        }
        DaemonError::Checkpoint(err) => {
            anyhow::Error::new(err).context("failed to persist checkpoint")
        }
        other => other.into(),
    }
}

fn install_signal_handlers(shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, stopping after the current cycle", sig);
                shutdown_flag.store(true, Ordering::SeqCst);
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, stopping after the current cycle");
            shutdown_flag.store(true, Ordering::SeqCst);
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct DaemonCli {
        #[command(flatten)]
        args: DaemonArgs,
    }

    fn no_overrides() -> DaemonArgs {
        DaemonArgs {
            once: false,
            poll_interval_secs: None,
            repo_dir: None,
            checkpoint_path: None,
            lock_path: None,
            heartbeat_path: None,
            retry_attempts: None,
            retry_backoff_secs: None,
            lookback_secs: None,
            page_size: None,
            pagination: None,
            gh_bin: None,
            tracker_bin: None,
            tracker_db: None,
        }
    }

    #[test]
    fn test_flags_override_config() {
        let args = DaemonArgs {
            once: true,
            poll_interval_secs: Some(5.0),
            repo_dir: Some(PathBuf::from("/srv/repo")),
            lock_path: Some(PathBuf::from("/tmp/mc.lock")),
            pagination: Some("Watermark".to_string()),
            ..no_overrides()
        };
        let base = DaemonConfig::default();
        let checkpoint = base.checkpoint_path.clone();
        let config = args.apply(base).unwrap();

        assert_eq!(config.poll_interval_secs, 5.0);
        assert_eq!(config.repo_dir, PathBuf::from("/srv/repo"));
        assert_eq!(config.lock_path, PathBuf::from("/tmp/mc.lock"));
        assert_eq!(config.checkpoint_path, checkpoint);
        assert_eq!(config.pagination, PaginationMode::Watermark);
    }

    #[test]
    fn test_retry_paging_and_binary_flags_override_config() {
        let args = DaemonArgs {
            retry_attempts: Some(0),
            retry_backoff_secs: Some(2.5),
            lookback_secs: Some(600),
            page_size: Some(25),
            gh_bin: Some("/opt/gh/bin/gh".to_string()),
            tracker_bin: Some("/opt/sudocode/bin/sudocode".to_string()),
            ..no_overrides()
        };
        let config = args.apply(DaemonConfig::default()).unwrap();

        // Clamped by normalisation, as a config file value would be.
        assert_eq!(config.retry_attempts, 1);
        assert_eq!(config.retry_backoff_secs, 2.5);
        assert_eq!(config.lookback_secs, 600);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.gh_bin, "/opt/gh/bin/gh");
        assert_eq!(config.tracker_bin, "/opt/sudocode/bin/sudocode");
        assert_eq!(config.pagination, PaginationMode::Exhaustive);
    }

    #[test]
    fn test_flags_parse_from_command_line() {
        let cli = DaemonCli::try_parse_from([
            "daemon",
            "--once",
            "--retry-attempts",
            "5",
            "--retry-backoff-secs",
            "0.5",
            "--page-size",
            "50",
            "--lookback-secs",
            "120",
            "--gh-bin",
            "gh-enterprise",
            "--tracker-bin",
            "sc",
        ])
        .unwrap();
        let config = cli.args.apply(DaemonConfig::default()).unwrap();

        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_backoff_secs, 0.5);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.lookback_secs, 120);
        assert_eq!(config.gh_bin, "gh-enterprise");
        assert_eq!(config.tracker_bin, "sc");
    }

    #[test]
    fn test_every_override_reads_its_environment_variable() {
        let command = <DaemonCli as clap::CommandFactory>::command();
        let envs: Vec<String> = command
            .get_arguments()
            .filter_map(|arg| arg.get_env())
            .map(|env| env.to_string_lossy().into_owned())
            .collect();

        for expected in [
            "MERGECLOSE_POLL_INTERVAL_SECS",
            "MERGECLOSE_REPO_DIR",
            "MERGECLOSE_CHECKPOINT_PATH",
            "MERGECLOSE_LOCK_PATH",
            "MERGECLOSE_HEARTBEAT_PATH",
            "MERGECLOSE_RETRY_ATTEMPTS",
            "MERGECLOSE_RETRY_BACKOFF_SECS",
            "MERGECLOSE_LOOKBACK_SECS",
            "MERGECLOSE_PAGE_SIZE",
            "MERGECLOSE_PAGINATION",
            "MERGECLOSE_GH_BIN",
            "MERGECLOSE_TRACKER_BIN",
            "MERGECLOSE_TRACKER_DB",
        ] {
            assert!(envs.iter().any(|e| e == expected), "missing env {}", expected);
        }
    }

    #[test]
    fn test_unknown_pagination_rejected() {
        assert!(parse_pagination("sideways").is_err());
    }
}
