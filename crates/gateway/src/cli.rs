//! Command-line surface: `serve` (default), `doctor`, `version`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sa_domain::config::Config;

#[derive(Parser, Debug)]
#[command(name = "serialagent", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Validate configuration and persistence reachability without serving.
    Doctor,
    /// Print version information.
    Version,
}

/// Load configuration from `path`, falling back to defaults if the file is
/// absent so a fresh checkout boots without ceremony.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    Config::from_toml_str(&raw).context("parsing config file")
}

/// `doctor`: validate the hardening gate and that the checkpoint directory
/// is reachable, without constructing the rest of the kernel.
pub fn doctor(config: &Config) -> bool {
    let mut ok = true;

    match config.validate() {
        Ok(()) => tracing::info!("config validation passed"),
        Err(e) => {
            tracing::error!(error = %e, "config validation failed");
            ok = false;
        }
    }

    match config.persistence.store {
        sa_domain::config::StoreKind::File => {
            match std::fs::create_dir_all(&config.persistence.checkpoint_dir) {
                Ok(()) => tracing::info!(dir = %config.persistence.checkpoint_dir, "checkpoint directory reachable"),
                Err(e) => {
                    tracing::error!(dir = %config.persistence.checkpoint_dir, error = %e, "checkpoint directory unreachable");
                    ok = false;
                }
            }
        }
        sa_domain::config::StoreKind::Memory => {
            tracing::info!("persistence store = memory, nothing to check on disk");
        }
    }

    ok
}
