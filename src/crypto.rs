//! Secret generation and one-way fingerprinting for access tokens.
//!
//! Format: `aat_` + 32 random bytes as hex = 68 chars total. Only the
//! SHA-256 hex digest and a short preview are ever persisted.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub const SECRET_PREFIX: &str = "aat_";
const SECRET_BYTES: usize = 32;

/// Presented secrets longer than this are rejected before hashing.
pub const MAX_PRESENTED_LEN: usize = 256;

const PREVIEW_HEAD: usize = 8;
const PREVIEW_TAIL: usize = 4;

/// Generate a fresh bearer secret from the OS CSPRNG.
/// The returned string is wiped from memory when dropped.
pub fn generate_secret() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; SECRET_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    Zeroizing::new(format!("{}{}", SECRET_PREFIX, hex::encode(&bytes[..])))
}

/// Lowercase hex SHA-256 of the secret. This is the lookup key in the store.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Human-readable identifier, e.g. `aat_3f9a…c01d`. Never enough to
/// reconstruct the secret.
pub fn preview(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= PREVIEW_HEAD + PREVIEW_TAIL {
        return "*".repeat(chars.len().min(PREVIEW_HEAD));
    }
    let head: String = chars[..PREVIEW_HEAD].iter().collect();
    let tail: String = chars[chars.len() - PREVIEW_TAIL..].iter().collect();
    format!("{}…{}", head, tail)
}
