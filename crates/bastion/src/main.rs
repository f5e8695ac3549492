//! Bastion command-line front end
//!
//! Drives the approval workflow service against a local SQLite store:
//! credentials, the script catalog, agents and workflows.

use anyhow::{Context, Result};
use bastion_logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};
use cli::context::{AppContext, GlobalArgs};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "bastion", version, about = "Approval-gated execution of privileged scripts")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.bastion/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = "BASTION_DB")]
    database: Option<PathBuf>,

    /// Credential secret to act as
    #[arg(long, global = true, env = "BASTION_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the store, default config and first admin credential
    Init {
        /// Name of the bootstrap admin credential
        #[arg(long, default_value = bastion_core::BOOTSTRAP_ADMIN_NAME)]
        admin_name: String,
    },

    /// Show resolved configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage credentials
    Token {
        #[command(subcommand)]
        action: cli::token::TokenAction,
    },

    /// Manage the script catalog
    Script {
        #[command(subcommand)]
        action: cli::script::ScriptAction,
    },

    /// Agent registration, heartbeat and listing
    Agent {
        #[command(subcommand)]
        action: cli::agent::AgentAction,
    },

    /// Approval workflows
    Workflow {
        #[command(subcommand)]
        action: cli::workflow::WorkflowAction,
    },
}

impl Cli {
    fn globals(&self) -> GlobalArgs {
        GlobalArgs {
            config: self.config.clone(),
            database: self.database.clone(),
            token: self.token.clone(),
        }
    }
}

fn command_wants_json(cmd: &Commands) -> bool {
    use cli::agent::AgentAction;
    use cli::script::ScriptAction;
    use cli::token::TokenAction;
    use cli::workflow::WorkflowAction;

    match cmd {
        Commands::Init { .. } => false,
        Commands::Config { json } => *json,
        Commands::Token { action } => match action {
            TokenAction::Create { json, .. } | TokenAction::List { json } => *json,
            TokenAction::Revoke { .. } => false,
        },
        Commands::Script { action } => match action {
            ScriptAction::Show { json, .. } | ScriptAction::List { json } => *json,
            ScriptAction::Add { .. } => false,
        },
        Commands::Agent { action } => match action {
            AgentAction::List { json } => *json,
            AgentAction::Register { .. } | AgentAction::Heartbeat { .. } => false,
        },
        Commands::Workflow { action } => match action {
            WorkflowAction::Create { json, .. }
            | WorkflowAction::List { json, .. }
            | WorkflowAction::Show { json, .. }
            | WorkflowAction::Execute { json, .. }
            | WorkflowAction::Audit { json, .. } => *json,
            WorkflowAction::Approve { .. }
            | WorkflowAction::Deny { .. }
            | WorkflowAction::Sweep => false,
        },
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    let globals = cli.globals();

    match cli.command {
        Commands::Init { admin_name } => {
            cli::init::run(&globals, cli::init::InitArgs { admin_name }).await
        }
        Commands::Config { json } => cli::config::run(&globals, cli::config::ConfigArgs { json }),
        Commands::Token { action } => {
            let ctx = AppContext::open(&globals).await?;
            cli::token::run(&ctx, action).await
        }
        Commands::Script { action } => {
            let ctx = AppContext::open(&globals).await?;
            cli::script::run(&ctx, action).await
        }
        Commands::Agent { action } => {
            let ctx = AppContext::open(&globals).await?;
            cli::agent::run(&ctx, action).await
        }
        Commands::Workflow { action } => {
            let ctx = AppContext::open(&globals).await?;
            cli::workflow::run(&ctx, action).await
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    if let Err(err) = init_logging(LogConfig {
        app_name: "bastion",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
        .and_then(|runtime| runtime.block_on(run_command(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
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
