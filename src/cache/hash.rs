//! Content hashing for cache keys and fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing, so struct field order
/// fixes the byte stream. Returns a 64-character lowercase hexadecimal string.
///
/// # Errors
/// Returns an error if the value cannot be serialized to JSON.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
