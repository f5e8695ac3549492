//! File-backed configuration.
//!
//! `config.toml` is optional. Every key has a default, and a handful of
//! environment variables override what the file says.

use crate::defaults::{
    DEFAULT_AGENT_PORT, DEFAULT_AGENT_STALE_AFTER_SECS, DEFAULT_EXECUTION_TIMEOUT_SECS,
    DEFAULT_LIST_LIMIT, DEFAULT_TTL_UNIT_SECS, DEFAULT_WORKFLOW_TTL,
};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATABASE: &str = "BASTION_DB";
pub const ENV_AGENT_REG_SECRET: &str = "BASTION_AGENT_REG_SECRET";
pub const ENV_AGENT_PORT: &str = "BASTION_AGENT_PORT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionConfig {
    pub database: DatabaseSettings,
    pub agents: AgentSettings,
    pub workflows: WorkflowSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file. Falls back to `~/.bastion/bastion.sqlite`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Shared secret agents present when self-registering. Registration is
    /// refused outright while this is unset.
    pub registration_secret: Option<String>,
    pub default_port: u16,
    pub stale_after_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            registration_secret: None,
            default_port: DEFAULT_AGENT_PORT,
            stale_after_secs: DEFAULT_AGENT_STALE_AFTER_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// TTL applied when a request names none, in TTL units.
    pub default_ttl: u32,
    /// Seconds per TTL unit.
    pub ttl_unit_secs: u64,
    /// 0 disables the bound.
    pub execution_timeout_secs: u64,
    /// Base directory for relative script paths.
    pub working_dir: Option<PathBuf>,
    pub list_limit: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_WORKFLOW_TTL,
            ttl_unit_secs: DEFAULT_TTL_UNIT_SECS,
            execution_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            working_dir: None,
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl BastionConfig {
    /// Load configuration, then apply environment overrides.
    ///
    /// An explicit `path` must exist. Without one, `~/.bastion/config.toml`
    /// is read if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = paths::default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            self.database.path = Some(PathBuf::from(db));
        }
        if let Some(secret) = lookup(ENV_AGENT_REG_SECRET).filter(|v| !v.is_empty()) {
            self.agents.registration_secret = Some(secret);
        }
        if let Some(port) = lookup(ENV_AGENT_PORT) {
            self.agents.default_port = port.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a port number, got '{}'", ENV_AGENT_PORT, port))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.default_port == 0 {
            return Err(ConfigError::Invalid("agents.default_port must be non-zero".into()));
        }
        if self.workflows.default_ttl == 0 {
            return Err(ConfigError::Invalid("workflows.default_ttl must be at least 1".into()));
        }
        if self.workflows.ttl_unit_secs == 0 {
            return Err(ConfigError::Invalid("workflows.ttl_unit_secs must be at least 1".into()));
        }
        if self.workflows.list_limit == 0 {
            return Err(ConfigError::Invalid("workflows.list_limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(paths::default_database_path)
    }

    pub fn working_dir(&self) -> PathBuf {
        self.workflows
            .working_dir
            .clone()
            .unwrap_or_else(paths::default_scripts_dir)
    }

    pub fn ttl_unit(&self) -> Duration {
        Duration::from_secs(self.workflows.ttl_unit_secs)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        match self.workflows.execution_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.agents.stale_after_secs)
    }
}
