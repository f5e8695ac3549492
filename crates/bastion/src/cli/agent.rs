//! Agent command - registration, heartbeat and liveness listing
//!
//! `register` and `heartbeat` are what an agent runs on its own behalf and
//! authenticate with the shared registration secret. `list` is an operator
//! view and needs a token.

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{format_attributes, format_relative, print_json, print_table_colored};
use bastion_core::{AgentRegistration, Permission};
use bastion_db::Attributes;
use clap::{Args, Subcommand};
use comfy_table::Color;

#[derive(Args, Debug, Clone)]
pub struct RegistrationSecret {
    /// Shared agent registration secret
    #[arg(long = "reg-secret", env = "BASTION_REG_SECRET", hide_env_values = true)]
    pub reg_secret: Option<String>,
}

impl RegistrationSecret {
    fn require(&self) -> Result<&str, HelpfulError> {
        self.reg_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(HelpfulError::missing_registration_secret)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum AgentAction {
    /// Register (or re-register) an agent
    Register {
        name: String,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Capability as key=value (repeatable)
        #[arg(long = "capability", value_parser = parse_key_value)]
        capabilities: Vec<(String, serde_json::Value)>,
        /// Metadata as key=value (repeatable)
        #[arg(long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, serde_json::Value)>,
        #[arg(long)]
        status: Option<String>,
        #[command(flatten)]
        secret: RegistrationSecret,
    },
    /// Report an agent as alive
    Heartbeat {
        name: String,
        #[arg(long)]
        status: Option<String>,
        /// Metadata as key=value (repeatable)
        #[arg(long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, serde_json::Value)>,
        #[command(flatten)]
        secret: RegistrationSecret,
    },
    /// List agents with their liveness
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse `key=value`. The value is read as JSON when it parses as JSON
/// (numbers, booleans, quoted strings) and as a plain string otherwise.
pub fn parse_key_value(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn to_attributes(pairs: Vec<(String, serde_json::Value)>) -> Attributes {
    pairs.into_iter().collect()
}

pub async fn run(ctx: &AppContext, action: AgentAction) -> anyhow::Result<()> {
    let agents = &ctx.controller.agents;

    match action {
        AgentAction::Register {
            name,
            host,
            port,
            capabilities,
            metadata,
            status,
            secret,
        } => {
            let registration = AgentRegistration {
                name,
                host,
                port,
                capabilities: to_attributes(capabilities),
                metadata: to_attributes(metadata),
                status,
            };
            let agent = agents
                .self_register(Some(secret.require()?), None, registration)
                .await
                .map_err(HelpfulError::from)?;
            println!(
                "Agent '{}' registered at {}:{}.",
                agent.name,
                agent.host.as_deref().unwrap_or("-"),
                agent.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
            );
        }
        AgentAction::Heartbeat {
            name,
            status,
            metadata,
            secret,
        } => {
            let agent = agents
                .self_heartbeat(
                    Some(secret.require()?),
                    &name,
                    status.as_deref(),
                    to_attributes(metadata),
                )
                .await
                .map_err(HelpfulError::from)?;
            println!("Agent '{}' is {}.", agent.name, agent.status);
        }
        AgentAction::List { json } => {
            ctx.authenticate(Permission::ReadAgents).await?;
            let views = agents.list_with_liveness().await.map_err(HelpfulError::from)?;
            if json {
                return print_json(&views);
            }
            if views.is_empty() {
                println!("No agents registered.");
                return Ok(());
            }
            let now = chrono::Utc::now();
            let rows = views
                .into_iter()
                .map(|v| {
                    let alive = if v.alive {
                        ("alive".to_string(), Some(Color::Green))
                    } else {
                        ("stale".to_string(), Some(Color::Red))
                    };
                    let address = match (&v.agent.host, v.agent.port) {
                        (Some(host), Some(port)) => format!("{}:{}", host, port),
                        (Some(host), None) => host.clone(),
                        _ => "-".to_string(),
                    };
                    vec![
                        (v.agent.name.clone(), None),
                        (address, None),
                        (v.agent.status.clone(), None),
                        alive,
                        (format_relative(v.agent.last_seen, now), None),
                        (format_attributes(&v.agent.capabilities), None),
                    ]
                })
                .collect();
            print_table_colored(
                &["Name", "Address", "Status", "Liveness", "Last Seen", "Capabilities"],
                rows,
            );
        }
    }
    Ok(())
}
