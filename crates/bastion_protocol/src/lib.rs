//! Configuration surface shared by the Bastion services and CLI.

pub mod config;
pub mod defaults;
pub mod paths;

pub use config::{AgentSettings, BastionConfig, ConfigError, DatabaseSettings, WorkflowSettings};
