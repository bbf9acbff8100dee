//! Connection secrets.
//!
//! Managed resources publish connection details into a source secret; the
//! propagator copies them to the secret a bound claim names, stamping each
//! copy with [`SecretProvenance`] so later runs can tell a stale copy from a
//! foreign one.
//!
//! # Submodules
//!
//! - [`memory`] - In-memory [`SecretStore`]
//! - [`propagate`] - The propagator itself

pub mod memory;
pub mod propagate;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::MANAGED_SECRET_NAMESPACE;
use crate::meta::ObjectReference;
use crate::resource::{GenericClaim, GenericManaged};
use crate::util::hash::ContentHash;

pub use memory::MemorySecretStore;
pub use propagate::{PropagationOutcome, SecretPropagationError, propagate_connection_secret};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecretKey {
  pub namespace: String,
  pub name: String,
}

impl SecretKey {
  pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      name: name.into(),
    }
  }

  /// Secret a managed resource publishes its connection details to.
  pub fn source_of(managed: &GenericManaged) -> Self {
    let namespace = managed.metadata.namespace.as_deref().unwrap_or(MANAGED_SECRET_NAMESPACE);
    Self::new(namespace, managed.connection_secret_name())
  }

  /// Secret a claim expects its connection details in.
  pub fn target_of(claim: &GenericClaim) -> Self {
    let namespace = claim.metadata.namespace.as_deref().unwrap_or_default();
    Self::new(namespace, claim.connection_secret_name())
  }
}

impl fmt::Display for SecretKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.namespace, self.name)
  }
}

/// Where a propagated secret's content came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretProvenance {
  pub source: SecretKey,
  pub owner: ObjectReference,
  /// Version of the source secret that was copied.
  pub source_version: u64,
  pub checksum: ContentHash,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSecret {
  #[serde(default)]
  pub data: BTreeMap<String, String>,
  /// Store-assigned version. Zero for a secret that has not been stored.
  #[serde(default)]
  pub version: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provenance: Option<SecretProvenance>,
}

impl ConnectionSecret {
  pub fn with_data<K, V>(data: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      data: data.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
      version: 0,
      provenance: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretStoreError {
  #[error("secret {key} was modified concurrently (expected version {expected}, found {actual})")]
  Conflict { key: SecretKey, expected: u64, actual: u64 },

  #[error("secret store unavailable: {0}")]
  Unavailable(String),
}

/// Get/put access to connection secrets.
///
/// `put` is conditional: the secret's `version` must equal the stored
/// version, with zero meaning "must not exist yet".
#[async_trait]
pub trait SecretStore: Send + Sync {
  async fn get(&self, key: &SecretKey) -> Result<Option<ConnectionSecret>, SecretStoreError>;

  async fn put(&self, key: &SecretKey, secret: ConnectionSecret) -> Result<ConnectionSecret, SecretStoreError>;

  /// All secrets, ordered by key.
  async fn list(&self) -> Result<Vec<(SecretKey, ConnectionSecret)>, SecretStoreError>;
}
