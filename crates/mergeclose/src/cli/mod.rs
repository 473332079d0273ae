//! Subcommands of the `mergeclose` binary.

pub mod close;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;

use anyhow::Result;
use mergeclose_daemon::DaemonConfig;
use mergeclose_protocol::paths;
use std::path::Path;

/// Resolve the daemon configuration.
///
/// An explicit path must exist; the default path may be absent.
pub fn load_config(explicit: Option<&Path>) -> Result<DaemonConfig> {
    let config = match explicit {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::load_or_default(&paths::default_config_path())?,
    };
    Ok(config)
}

/// Print `value` as compact JSON with sorted keys.
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}
