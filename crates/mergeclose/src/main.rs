//! mergeclose launcher
//!
//! - `daemon`: poll merged pull requests and close their tracker items
//! - `close`: one-shot close from a webhook event or operator-supplied fields
//! - `health`: evaluate the daemon heartbeat
//! - `config`: print the effective daemon configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use mergeclose_logging::{init_logging, LogConfig};
use mergeclose_protocol::paths;
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "mergeclose", about = "Close review-gated tracker items when their PRs merge")]
struct Cli {
    /// Enable verbose logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Daemon config file (default: ~/.mergeclose/daemon.toml)
    #[arg(long, global = true, env = "MERGECLOSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the polling merge-close daemon
    Daemon(cli::daemon::DaemonArgs),

    /// Apply (or preview) a single merge close
    Close(cli::close::CloseArgs),

    /// Check daemon health from its heartbeat
    Health(cli::health::HealthArgs),

    /// Show the effective daemon configuration
    Config(cli::config::ConfigArgs),
}

/// Commands whose stdout is machine-readable.
fn command_wants_json(cmd: &Commands) -> bool {
    match cmd {
        Commands::Close(_) | Commands::Health(_) => true,
        Commands::Config(args) => args.json,
        Commands::Daemon(args) => args.once,
    }
}

fn run_command(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Daemon(args) => cli::daemon::run(args, config_path),
        Commands::Close(args) => cli::close::run(args, config_path),
        Commands::Health(args) => cli::health::run(args, config_path),
        Commands::Config(args) => cli::config::run(args, config_path),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    if let Err(err) = init_logging(LogConfig {
        app_name: "mergeclose",
        log_dir: paths::default_logs_dir(),
        verbose: cli.verbose,
        json_output: json_mode,
    }) {
        eprintln!("Warning: {:#}", err);
    }

    match run_command(cli) {
        Ok(code) => code,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
