//! CLI module for Bastion
//!
//! Every command opens the store, authenticates the caller where the
//! operation is role-gated, and calls straight into `bastion_core`.

pub mod context;
pub mod error;
pub mod output;

pub mod agent;
pub mod config;
pub mod init;
pub mod script;
pub mod token;
pub mod workflow;
