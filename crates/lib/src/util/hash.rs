//! Content checksums.
//!
//! Connection secrets are compared and provenance-stamped by the SHA-256 of
//! their canonical JSON form.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type HashError = serde_json::Error;

/// A full 64-character SHA-256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Hash the JSON serialization of a value.
///
/// Only deterministic for types whose serialization is ordered (`BTreeMap`,
/// structs), which is what callers pass.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> Result<ContentHash, HashError> {
  let serialized = serde_json::to_vec(value)?;
  Ok(hash_bytes(&serialized))
}
