//! Per-invocation context: resolved configuration, open store, caller credential.

use crate::cli::error::HelpfulError;
use bastion_core::{Controller, Permission, Principal};
use bastion_db::BastionDb;
use bastion_protocol::BastionConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Global flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub token: Option<String>,
}

pub struct AppContext {
    pub config: BastionConfig,
    pub controller: Controller,
    token: Option<String>,
}

impl AppContext {
    pub async fn open(globals: &GlobalArgs) -> anyhow::Result<Self> {
        let config = load_config(globals)?;
        let db_path = config.database_path();

        let db = BastionDb::open(&db_path)
            .await
            .map_err(|e| HelpfulError::database_unavailable(&db_path, &e.to_string()))?;
        debug!(path = %db_path.display(), "Store ready");

        Ok(Self {
            controller: Controller::with_system_clock(db, &config),
            config,
            token: globals.token.clone(),
        })
    }

    /// Resolve the caller's credential for `permission`.
    pub async fn authenticate(&self, permission: Permission) -> anyhow::Result<Principal> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(HelpfulError::missing_token)?;
        Ok(self
            .controller
            .tokens
            .authenticate(token, permission)
            .await
            .map_err(HelpfulError::from)?)
    }
}

/// Load configuration and apply `--database` on top of file and environment.
pub fn load_config(globals: &GlobalArgs) -> anyhow::Result<BastionConfig> {
    let mut config = BastionConfig::load(globals.config.as_deref()).map_err(|e| {
        HelpfulError::new(e.to_string()).with_suggestion(config_hint(globals.config.as_deref()))
    })?;
    if let Some(path) = &globals.database {
        config.database.path = Some(path.clone());
    }
    Ok(config)
}

fn config_hint(explicit: Option<&Path>) -> String {
    match explicit {
        Some(path) => format!("TRY: Check the file exists and is valid TOML: {}", path.display()),
        None => format!(
            "TRY: Fix or remove {}",
            bastion_protocol::paths::default_config_path().display()
        ),
    }
}
