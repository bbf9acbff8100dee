//! Fixture documents.
//!
//! A fixture describes kind registrations, objects and published connection
//! secrets. It is how the CLI (and tests) populate the in-memory stores.
//! YAML and JSON are both accepted, chosen by file extension.
//!
//! ```yaml
//! kinds:
//!   - claim: MySQLInstance
//!     portableClass: MySQLInstanceClass
//!     managed: CloudSQLInstance
//!     nonPortableClass: CloudSQLInstanceClass
//! objects:
//!   - type: claim
//!     kind: MySQLInstance
//!     metadata: { name: db, namespace: app }
//! secrets:
//!   - namespace: claimbind-system
//!     name: sql-1
//!     data: { password: hunter2 }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::resource::{KindBinding, KindRegistry, KindRole, Object, RegistryError};
use crate::secret::{ConnectionSecret, SecretKey, SecretStore, SecretStoreError};
use crate::store::{ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum FixtureError {
  #[error("failed to read fixture {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse YAML fixture: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("failed to parse JSON fixture: {0}")]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error("object {key} has unregistered kind")]
  UnregisteredObject { key: String },

  #[error("object {key} is declared as {declared:?} but its kind is registered as {registered:?}")]
  RoleMismatch {
    key: String,
    declared: KindRole,
    registered: KindRole,
  },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  SecretStore(#[from] SecretStoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSecret {
  pub namespace: String,
  pub name: String,
  #[serde(default)]
  pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
  #[serde(default)]
  pub kinds: Vec<KindBinding>,
  #[serde(default)]
  pub objects: Vec<Object>,
  #[serde(default)]
  pub secrets: Vec<FixtureSecret>,
}

impl Fixture {
  /// Parses a fixture file; `.json` is read as JSON, anything else as YAML.
  pub fn load(path: &Path) -> Result<Self, FixtureError> {
    let content = fs::read_to_string(path).map_err(|source| FixtureError::Read {
      path: path.display().to_string(),
      source,
    })?;
    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
      Self::from_json(&content)
    } else {
      Self::from_yaml(&content)
    }
  }

  pub fn from_yaml(content: &str) -> Result<Self, FixtureError> {
    Ok(serde_yaml::from_str(content)?)
  }

  pub fn from_json(content: &str) -> Result<Self, FixtureError> {
    Ok(serde_json::from_str(content)?)
  }

  pub fn registry(&self) -> Result<KindRegistry, FixtureError> {
    let mut registry = KindRegistry::new();
    for binding in &self.kinds {
      registry.register(binding.clone())?;
    }
    Ok(registry)
  }

  /// Creates every object and secret, in document order, and returns the
  /// registry built from the fixture's kinds.
  pub async fn apply(&self, store: &dyn ObjectStore, secrets: &dyn SecretStore) -> Result<KindRegistry, FixtureError> {
    let registry = self.registry()?;

    for object in &self.objects {
      let Some(registered) = registry.role_of(object.kind()) else {
        return Err(FixtureError::UnregisteredObject {
          key: object.key().to_string(),
        });
      };
      if registered != object.role() {
        return Err(FixtureError::RoleMismatch {
          key: object.key().to_string(),
          declared: object.role(),
          registered,
        });
      }
      store.create(object.clone()).await?;
    }

    for secret in &self.secrets {
      let key = SecretKey::new(&secret.namespace, &secret.name);
      let version = secrets.get(&key).await?.map(|s| s.version).unwrap_or(0);
      let published = ConnectionSecret {
        data: secret.data.clone(),
        version,
        provenance: None,
      };
      secrets.put(&key, published).await?;
    }

    debug!(
      kinds = self.kinds.len(),
      objects = self.objects.len(),
      secrets = self.secrets.len(),
      "fixture applied"
    );
    Ok(registry)
  }
}
