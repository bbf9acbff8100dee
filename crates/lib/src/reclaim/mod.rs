//! Reclaim policy enforcement.
//!
//! Two triggers lead here. When a bound claim disappears, its managed
//! resource is released; a released resource with policy `Delete` is then
//! marked for deletion, while `Retain` leaves it alone. When a managed
//! resource is deleted directly, the reclaim finalizer holds it until the
//! external resource has been deprovisioned (`Delete`) or deliberately kept
//! (`Retain`).
//!
//! Claim deletion never deletes the managed resource inline: the claim side
//! only stops existing, and the managed resource's own reconcile acts on it.

mod provisioner;

use thiserror::Error;
use tracing::{debug, info};

use crate::binding::{BindingEvent, BindingPhase, PhaseTransitionError, apply_binding_event};
use crate::condition::Condition;
use crate::consts::RECLAIM_FINALIZER;
use crate::resource::{ClaimReferencer, Conditioned, GenericManaged, Managed, ObjectMetaAccessor, ReclaimPolicy};
use crate::store::{ObjectStore, StoreError, update_typed};

pub use provisioner::{ProvisionError, Provisioner, RecordingProvisioner};

/// What the managed resource's reconcile observed about its claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterpartState {
  /// No claim reference is set.
  Unclaimed,
  /// The referenced claim exists and is not being deleted.
  Present,
  /// The referenced claim is missing, being deleted, or was recreated.
  Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimAction {
  None,
  /// Move to `Released`.
  Release,
  /// Request deletion of the released managed resource.
  MarkForDeletion,
  /// Drop the finalizer, keeping the external resource.
  RetainExternal,
  /// Deprovision the external resource, then drop the finalizer.
  DeprovisionExternal,
}

#[derive(Debug, Error)]
pub enum ReclaimError {
  #[error(transparent)]
  Phase(#[from] PhaseTransitionError),

  #[error(transparent)]
  Provision(#[from] ProvisionError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Decides the reclaim action for a managed resource.
pub fn decide<M: Managed>(managed: &M, counterpart: CounterpartState) -> ReclaimAction {
  if managed.meta().is_deleting() {
    if !managed.meta().has_finalizer(RECLAIM_FINALIZER) {
      return ReclaimAction::None;
    }
    return match managed.reclaim_policy() {
      ReclaimPolicy::Delete => ReclaimAction::DeprovisionExternal,
      ReclaimPolicy::Retain => ReclaimAction::RetainExternal,
    };
  }

  match (managed.binding_phase(), counterpart) {
    (BindingPhase::Released, _) => match managed.reclaim_policy() {
      ReclaimPolicy::Delete => ReclaimAction::MarkForDeletion,
      ReclaimPolicy::Retain => ReclaimAction::None,
    },
    // Half-bound resources release too: the claim they point at can never
    // complete the binding.
    (BindingPhase::Bound | BindingPhase::Unbound, CounterpartState::Gone) => ReclaimAction::Release,
    _ => ReclaimAction::None,
  }
}

pub struct ReclaimEnforcer<'a> {
  store: &'a dyn ObjectStore,
  provisioner: &'a dyn Provisioner,
}

impl<'a> ReclaimEnforcer<'a> {
  pub fn new(store: &'a dyn ObjectStore, provisioner: &'a dyn Provisioner) -> Self {
    Self { store, provisioner }
  }

  /// Adds the reclaim finalizer unless the resource is already being deleted.
  pub async fn ensure_finalizer(&self, mut managed: GenericManaged) -> Result<GenericManaged, ReclaimError> {
    if managed.metadata.is_deleting() || !managed.metadata.add_finalizer(RECLAIM_FINALIZER) {
      return Ok(managed);
    }
    let managed = update_typed(self.store, managed).await?;
    debug!(resource = %managed.key(), "reclaim finalizer added");
    Ok(managed)
  }

  /// Carries out `action`, returning the resource as stored afterwards
  /// (`None` once it is gone).
  pub async fn enforce(
    &self,
    mut managed: GenericManaged,
    action: ReclaimAction,
  ) -> Result<Option<GenericManaged>, ReclaimError> {
    let key = managed.key();
    match action {
      ReclaimAction::None => Ok(Some(managed)),
      ReclaimAction::Release => {
        apply_binding_event(&mut managed, BindingEvent::CounterpartDeleted)?;
        managed.set_conditions(vec![Condition::released()]);
        let managed = update_typed(self.store, managed).await?;
        info!(
          resource = %key,
          claim = ?managed.claim_reference().map(ToString::to_string),
          policy = %managed.spec.reclaim_policy,
          "resource released"
        );
        Ok(Some(managed))
      }
      ReclaimAction::MarkForDeletion => {
        self.store.delete(&key).await?;
        info!(resource = %key, "released resource marked for deletion");
        Ok(None)
      }
      ReclaimAction::RetainExternal => {
        info!(resource = %key, "retaining external resource");
        self.release_finalizer(managed).await
      }
      ReclaimAction::DeprovisionExternal => {
        self.provisioner.deprovision(&managed).await?;
        self.release_finalizer(managed).await
      }
    }
  }

  async fn release_finalizer(&self, mut managed: GenericManaged) -> Result<Option<GenericManaged>, ReclaimError> {
    managed.metadata.remove_finalizer(RECLAIM_FINALIZER);
    managed.set_conditions(vec![Condition::deleting()]);
    let stored = update_typed(self.store, managed).await;
    match stored {
      Ok(m) if m.metadata.is_deleting() && m.metadata.finalizers.is_empty() => Ok(None),
      Ok(m) => Ok(Some(m)),
      Err(StoreError::NotFound(_)) => Ok(None),
      Err(e) => Err(e.into()),
    }
  }
}
