//! `mergeclose config`: show the effective daemon configuration.

use anyhow::Result;
use mergeclose_protocol::paths;
use std::path::Path;
use std::process::ExitCode;

use crate::cli::load_config;

/// Arguments for the config command
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Print as JSON instead of TOML
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let source = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(paths::default_config_path);

    if args.json {
        let value = serde_json::json!({
            "home": paths::mergeclose_home().to_string_lossy(),
            "config_file": {
                "path": source.to_string_lossy(),
                "exists": source.exists(),
            },
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("# mergeclose home: {}", paths::mergeclose_home().display());
        println!(
            "# config file: {} ({})",
            source.display(),
            if source.exists() { "exists" } else { "not found, using defaults" }
        );
        print!("{}", config.to_toml()?);
    }
    Ok(ExitCode::SUCCESS)
}
