//! SHA256 hashing for credential identity
//!
//! Credentials are stored only as the hex digest of their plaintext secret.

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of data
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest of a plaintext bearer secret, as stored in the credential table.
pub fn hash_secret(secret: &str) -> String {
    sha256(secret.as_bytes())
}
