//! Config command - show the resolved configuration
//!
//! Everything shown here is what a command would actually use after the
//! config file, environment overrides and `--database` are applied.

use crate::cli::context::{load_config, GlobalArgs};
use crate::cli::output::{print_json, print_table};
use bastion_protocol::paths::default_config_path;
use bastion_protocol::BastionConfig;
use serde::Serialize;
use std::path::PathBuf;

const REDACTED: &str = "<set>";

#[derive(Debug)]
pub struct ConfigArgs {
    pub json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedConfig {
    config_file: PathBuf,
    config_file_exists: bool,
    database: PathBuf,
    working_dir: PathBuf,
    logs_dir: PathBuf,
    registration_enabled: bool,
    default_agent_port: u16,
    agent_stale_after_secs: u64,
    default_ttl: u32,
    ttl_unit_secs: u64,
    execution_timeout_secs: Option<u64>,
    list_limit: u32,
}

impl ResolvedConfig {
    fn new(config: &BastionConfig, config_file: PathBuf) -> Self {
        Self {
            config_file_exists: config_file.exists(),
            config_file,
            database: config.database_path(),
            working_dir: config.working_dir(),
            logs_dir: bastion_protocol::paths::default_logs_dir(),
            registration_enabled: config.agents.registration_secret.is_some(),
            default_agent_port: config.agents.default_port,
            agent_stale_after_secs: config.agents.stale_after_secs,
            default_ttl: config.workflows.default_ttl,
            ttl_unit_secs: config.workflows.ttl_unit_secs,
            execution_timeout_secs: config.execution_timeout().map(|d| d.as_secs()),
            list_limit: config.workflows.list_limit,
        }
    }

    fn rows(&self) -> Vec<Vec<String>> {
        let exists = if self.config_file_exists { "" } else { " (not found, using defaults)" };
        vec![
            row("config file", format!("{}{}", self.config_file.display(), exists)),
            row("database", self.database.display()),
            row("working dir", self.working_dir.display()),
            row("logs", self.logs_dir.display()),
            row(
                "registration secret",
                if self.registration_enabled { REDACTED } else { "<unset, registration disabled>" },
            ),
            row("default agent port", self.default_agent_port),
            row("agent stale after", format!("{}s", self.agent_stale_after_secs)),
            row("default ttl", format!("{} x {}s", self.default_ttl, self.ttl_unit_secs)),
            row(
                "execution timeout",
                self.execution_timeout_secs
                    .map(|s| format!("{}s", s))
                    .unwrap_or_else(|| "none".to_string()),
            ),
            row("list limit", self.list_limit),
        ]
    }
}

fn row(key: &str, value: impl std::fmt::Display) -> Vec<String> {
    vec![key.to_string(), value.to_string()]
}

pub fn run(globals: &GlobalArgs, args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(globals)?;
    let file = globals.config.clone().unwrap_or_else(default_config_path);
    let resolved = ResolvedConfig::new(&config, file);

    if args.json {
        print_json(&resolved)
    } else {
        print_table(&["Setting", "Value"], resolved.rows());
        Ok(())
    }
}
