//! Init command - prepare a fresh Bastion home
//!
//! Writes a default config file when none exists, creates the script
//! working directory, creates the store and issues the first admin
//! credential. Safe to re-run: nothing existing is overwritten.

use crate::cli::context::{AppContext, GlobalArgs};
use crate::cli::error::HelpfulError;
use bastion_protocol::paths::default_config_path;
use bastion_protocol::BastionConfig;
use std::path::Path;
use tracing::info;

#[derive(Debug)]
pub struct InitArgs {
    pub admin_name: String,
}

pub async fn run(globals: &GlobalArgs, args: InitArgs) -> anyhow::Result<()> {
    if globals.config.is_none() {
        let path = default_config_path();
        if write_default_config(&path)? {
            println!("Wrote default config: {}", path.display());
        }
    }

    let ctx = AppContext::open(globals).await?;

    let working_dir = ctx.config.working_dir();
    std::fs::create_dir_all(&working_dir).map_err(|e| {
        HelpfulError::new(format!("Cannot create script directory: {}", working_dir.display()))
            .with_context(e.to_string())
            .with_suggestion("TRY: Set [workflows] working_dir in the config file")
    })?;

    println!("Database: {}", ctx.config.database_path().display());
    println!("Scripts:  {}", working_dir.display());

    let secret = ctx
        .controller
        .tokens
        .bootstrap_admin(&args.admin_name)
        .await
        .map_err(HelpfulError::from)?;

    match secret {
        Some(secret) => {
            info!(credential = %args.admin_name, "Store initialized");
            println!();
            println!("Admin credential '{}' created. Secret (shown once):", args.admin_name);
            println!();
            println!("  {}", secret);
            println!();
            println!("  export BASTION_TOKEN={}", secret);
        }
        None => println!("Credentials already exist; no admin credential issued."),
    }
    Ok(())
}

/// Write `BastionConfig::default()` to `path` unless a file is already there.
fn write_default_config(path: &Path) -> anyhow::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(&BastionConfig::default())?;
    std::fs::write(path, contents)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_round_trips_and_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default_config(&path).unwrap());
        let loaded = BastionConfig::from_file(&path).unwrap();
        assert_eq!(loaded, BastionConfig::default());

        std::fs::write(&path, "[agents]\ndefault_port = 9000\n").unwrap();
        assert!(!write_default_config(&path).unwrap());
        assert_eq!(BastionConfig::from_file(&path).unwrap().agents.default_port, 9000);
    }
}
