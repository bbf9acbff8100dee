use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::trace;

use super::{ConnectionSecret, SecretKey, SecretStore, SecretStoreError};

#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
  secrets: Arc<Mutex<BTreeMap<SecretKey, ConnectionSecret>>>,
}

fn poisoned<T>(_: PoisonError<T>) -> SecretStoreError {
  SecretStoreError::Unavailable("secret store lock poisoned".to_string())
}

impl MemorySecretStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
  async fn get(&self, key: &SecretKey) -> Result<Option<ConnectionSecret>, SecretStoreError> {
    let secrets = self.secrets.lock().map_err(poisoned)?;
    Ok(secrets.get(key).cloned())
  }

  async fn put(&self, key: &SecretKey, mut secret: ConnectionSecret) -> Result<ConnectionSecret, SecretStoreError> {
    let mut secrets = self.secrets.lock().map_err(poisoned)?;
    let actual = secrets.get(key).map(|s| s.version).unwrap_or(0);
    if secret.version != actual {
      return Err(SecretStoreError::Conflict {
        key: key.clone(),
        expected: secret.version,
        actual,
      });
    }

    secret.version = actual + 1;
    secrets.insert(key.clone(), secret.clone());
    trace!(secret = %key, version = secret.version, "secret stored");
    Ok(secret)
  }

  async fn list(&self) -> Result<Vec<(SecretKey, ConnectionSecret)>, SecretStoreError> {
    let secrets = self.secrets.lock().map_err(poisoned)?;
    Ok(secrets.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
  }
}
