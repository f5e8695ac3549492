//! Shared logging utilities for Bastion binaries.
//!
//! Two layers are installed: a size-rotated file under `~/.bastion/logs`
//! that records everything the filter admits, and a stderr layer that is
//! quiet unless `verbose` is set. `RUST_LOG` overrides both filters.

mod rolling;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use rolling::RotationPolicy;
use rolling::SharedRollingWriter;

const DEFAULT_LOG_FILTER: &str = "bastion=info,bastion_core=info,bastion_db=info";
const VERBOSE_LOG_FILTER: &str = "bastion=debug,bastion_core=debug,bastion_db=debug";
const QUIET_CONSOLE_FILTER: &str = "warn";

/// Logging configuration shared by Bastion binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Override for the log directory; defaults to `~/.bastion/logs`.
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => bastion_protocol::paths::default_logs_dir(),
    };
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;

    let file_writer = SharedRollingWriter::new(log_dir, config.app_name, RotationPolicy::default())
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let default_filter = if config.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new(QUIET_CONSOLE_FILTER)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Global tracing subscriber already installed")?;

    Ok(())
}
