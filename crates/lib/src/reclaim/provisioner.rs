use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::meta::ObjectKey;
use crate::resource::{GenericManaged, ObjectMetaAccessor};

#[derive(Debug, Error)]
pub enum ProvisionError {
  #[error("failed to deprovision {resource}: {message}")]
  Deprovision { resource: ObjectKey, message: String },
}

/// The subsystem that owns external infrastructure.
///
/// Only teardown is modeled; creation and readiness reporting happen out of
/// band through the managed resource's own status.
#[async_trait]
pub trait Provisioner: Send + Sync {
  async fn deprovision(&self, managed: &GenericManaged) -> Result<(), ProvisionError>;
}

/// Records deprovision requests instead of acting on them.
#[derive(Debug, Clone, Default)]
pub struct RecordingProvisioner {
  deprovisioned: Arc<Mutex<Vec<ObjectKey>>>,
}

impl RecordingProvisioner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Resources deprovisioned so far, in call order.
  pub fn deprovisioned(&self) -> Vec<ObjectKey> {
    self.deprovisioned.lock().map(|d| d.clone()).unwrap_or_default()
  }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
  async fn deprovision(&self, managed: &GenericManaged) -> Result<(), ProvisionError> {
    let key = managed.key();
    info!(resource = %key, "deprovisioning external resource");
    self
      .deprovisioned
      .lock()
      .map_err(|_| ProvisionError::Deprovision {
        resource: key.clone(),
        message: "provisioner lock poisoned".to_string(),
      })?
      .push(key);
    Ok(())
  }
}
