//! Random bearer secrets and timing-safe comparison.

use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Number of random bytes behind each generated secret.
pub const SECRET_BYTES: usize = 32;

/// Generate a URL-safe secret from 32 bytes of OS randomness.
///
/// The result is unpadded base64, 43 characters long.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare a presented secret with the expected one without early exit.
///
/// Length differences still return false; only the length leaks.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}
