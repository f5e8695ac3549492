//! Bastion Security Module
//!
//! Provides:
//! - **Signing**: SHA256 digests used as credential fingerprints
//! - **Secrets**: random bearer secrets and constant-time comparison

pub mod secrets;
pub mod signing;

pub use secrets::{generate_secret, secrets_match};
pub use signing::{hash_secret, sha256};
