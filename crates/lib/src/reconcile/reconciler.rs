use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::binding::{BindError, BindingEvent, BindingMatcher, BindingPhase, MatchOutcome, apply_binding_event};
use crate::class::{ClassResolutionError, resolve_class};
use crate::condition::Condition;
use crate::config::ControllerConfig;
use crate::meta::{ObjectKey, ObjectReference};
use crate::reclaim::{CounterpartState, Provisioner, ReclaimAction, ReclaimEnforcer, decide};
use crate::resource::{
  Bindable, ClaimReferencer, Conditioned, GenericClaim, GenericManaged, KindRegistry, KindRole, RegistryError,
  TypedObject,
};
use crate::retry::RetryPolicy;
use crate::secret::{PropagationOutcome, SecretPropagationError, SecretStore, propagate_connection_secret};
use crate::store::{ObjectStore, get_typed, update_typed};

use super::{ReconcileError, Requeue};

/// Runs reconcile passes against injected stores.
pub struct Reconciler {
  store: Arc<dyn ObjectStore>,
  secrets: Arc<dyn SecretStore>,
  provisioner: Arc<dyn Provisioner>,
  registry: Arc<KindRegistry>,
  bind_retry: RetryPolicy,
  resource_wait: Duration,
}

impl Reconciler {
  pub fn new(
    store: Arc<dyn ObjectStore>,
    secrets: Arc<dyn SecretStore>,
    provisioner: Arc<dyn Provisioner>,
    registry: Arc<KindRegistry>,
    config: &ControllerConfig,
  ) -> Self {
    Self {
      store,
      secrets,
      provisioner,
      registry,
      bind_retry: config.bind_retry.clone(),
      resource_wait: config.resource_wait,
    }
  }

  /// Dispatches by the role of the key's kind. Class kinds have no pass of
  /// their own; their changes are fanned out to claims by the controller.
  pub async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
    match self.registry.role_of(&key.kind) {
      Some(KindRole::Claim) => self.reconcile_claim(key).await,
      Some(KindRole::Managed) => self.reconcile_managed(key).await,
      Some(KindRole::PortableClass | KindRole::NonPortableClass) => Ok(Requeue::None),
      None => Err(RegistryError::Unregistered(key.kind.clone()).into()),
    }
  }

  pub async fn reconcile_claim(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
    absorb_conflicts(key, self.claim_pass(key).await)
  }

  pub async fn reconcile_managed(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
    absorb_conflicts(key, self.managed_pass(key).await)
  }

  async fn claim_pass(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
    let store = &*self.store;
    let Some(mut claim) = get_typed::<GenericClaim>(store, key).await? else {
      return Ok(Requeue::None);
    };
    if claim.metadata.is_deleting() {
      debug!(claim = %key, "claim is being deleted");
      return Ok(Requeue::None);
    }
    if claim.binding_phase() == BindingPhase::Released {
      self.record(claim, vec![Condition::released(), Condition::reconcile_success()]).await?;
      return Ok(Requeue::None);
    }

    let before = claim.clone();
    match resolve_class(store, &self.registry, &mut claim).await {
      Ok(_) => {
        apply_binding_event(&mut claim, BindingEvent::PrerequisitesMet)?;
        self.write_if_changed(&before, claim).await?;
      }
      Err(ClassResolutionError::Store(e)) => return Err(e.into()),
      Err(ClassResolutionError::Registry(e)) => return Err(e.into()),
      Err(e) => {
        warn!(claim = %key, error = %e, "class resolution failed");
        self.record(before, vec![Condition::class_resolution_failed(&e)]).await?;
        return Ok(Requeue::Backoff);
      }
    }

    let matcher = BindingMatcher::new(store, &self.registry, &self.bind_retry);
    match matcher.bind(key).await {
      Ok(MatchOutcome::Bound(resource)) => self.propagate(key, &resource).await,
      Ok(MatchOutcome::NoAvailableResource) => {
        self
          .record_key::<GenericClaim>(key, vec![Condition::waiting_for_resource(), Condition::reconcile_success()])
          .await?;
        Ok(Requeue::After(self.resource_wait))
      }
      Err(err) => self.bind_failed(key, err).await,
    }
  }

  async fn propagate(&self, key: &ObjectKey, resource: &ObjectReference) -> Result<Requeue, ReconcileError> {
    let store = &*self.store;
    let Some(claim) = get_typed::<GenericClaim>(store, key).await? else {
      return Ok(Requeue::None);
    };
    let Some(managed) = get_typed::<GenericManaged>(store, &resource.key()).await? else {
      return Ok(Requeue::Immediate);
    };

    match propagate_connection_secret(&*self.secrets, &claim, &managed).await {
      Ok(PropagationOutcome::Written | PropagationOutcome::Updated | PropagationOutcome::Unchanged) => {
        self.record(claim, vec![Condition::available(), Condition::reconcile_success()]).await?;
        Ok(Requeue::None)
      }
      Ok(PropagationOutcome::SourceNotReady) => {
        let waiting = Condition::creating().with_message(format!("waiting for {resource} to publish connection details"));
        self.record(claim, vec![waiting, Condition::reconcile_success()]).await?;
        Ok(Requeue::After(self.resource_wait))
      }
      Ok(PropagationOutcome::NotBound) => Ok(Requeue::Immediate),
      Err(SecretPropagationError::Store(e)) => Err(e.into()),
      Err(e @ SecretPropagationError::Conflict { .. }) => {
        self
          .record(claim, vec![Condition::unavailable(), Condition::secret_propagation_conflict(&e)])
          .await?;
        Ok(Requeue::Backoff)
      }
      Err(e) => {
        self.record(claim, vec![Condition::reconcile_error(&e)]).await?;
        Ok(Requeue::Backoff)
      }
    }
  }

  async fn bind_failed(&self, key: &ObjectKey, err: BindError) -> Result<Requeue, ReconcileError> {
    match err {
      BindError::ClaimNotFound(_)
      | BindError::NotBindable {
        phase: BindingPhase::Released,
        ..
      } => Ok(Requeue::None),
      BindError::ResourceMissing { resource, .. } => {
        let Some(claim) = get_typed::<GenericClaim>(&*self.store, key).await? else {
          return Ok(Requeue::None);
        };
        let before = claim.clone();
        let mut claim = claim;
        apply_binding_event(&mut claim, BindingEvent::CounterpartDeleted)?;
        claim.set_conditions(vec![Condition::released(), Condition::reconcile_success()]);
        self.write_if_changed(&before, claim).await?;
        info!(claim = %key, resource = %resource, "bound resource is gone, claim released");
        Ok(Requeue::None)
      }
      BindError::Conflict { .. } => {
        self.record_key::<GenericClaim>(key, vec![Condition::binding_conflict(&err)]).await?;
        Ok(Requeue::Backoff)
      }
      BindError::Store(e) => Err(e.into()),
      BindError::Registry(e) => Err(e.into()),
      other => {
        warn!(claim = %key, error = %other, "binding failed");
        self.record_key::<GenericClaim>(key, vec![Condition::reconcile_error(&other)]).await?;
        Ok(Requeue::Backoff)
      }
    }
  }

  async fn managed_pass(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
    let store = &*self.store;
    let Some(managed) = get_typed::<GenericManaged>(store, key).await? else {
      return Ok(Requeue::None);
    };

    let enforcer = ReclaimEnforcer::new(store, &*self.provisioner);
    let mut managed = enforcer.ensure_finalizer(managed).await?;

    let counterpart = self.counterpart_of(&managed).await?;
    let action = decide(&managed, counterpart);
    if action != ReclaimAction::None {
      debug!(resource = %key, action = ?action, counterpart = ?counterpart, "enforcing reclaim policy");
      enforcer.enforce(managed, action).await?;
      return Ok(Requeue::None);
    }
    if managed.metadata.is_deleting() {
      return Ok(Requeue::None);
    }

    let before = managed.clone();
    let has_class = managed.spec.class_ref.is_some();
    let usable = has_class && managed.status.conditioned.is_ready();
    match managed.binding_phase() {
      BindingPhase::Unbindable if usable => {
        apply_binding_event(&mut managed, BindingEvent::PrerequisitesMet)?;
        info!(resource = %key, "resource available for binding");
      }
      BindingPhase::Unbound if !usable && managed.claim_reference().is_none() => {
        apply_binding_event(&mut managed, BindingEvent::PrerequisitesLost)?;
      }
      BindingPhase::Bound | BindingPhase::Released if !has_class => {
        apply_binding_event(&mut managed, BindingEvent::PrerequisitesLost)?;
      }
      _ => {}
    }
    managed.set_conditions(vec![Condition::reconcile_success()]);
    self.write_if_changed(&before, managed).await?;
    Ok(Requeue::None)
  }

  async fn counterpart_of(&self, managed: &GenericManaged) -> Result<CounterpartState, ReconcileError> {
    let Some(reference) = managed.claim_reference() else {
      return Ok(CounterpartState::Unclaimed);
    };
    let claim = get_typed::<GenericClaim>(&*self.store, &reference.key()).await?;
    Ok(match claim {
      Some(c) if reference.refers_to(&c.kind, &c.metadata) && !c.metadata.is_deleting() => CounterpartState::Present,
      _ => CounterpartState::Gone,
    })
  }

  /// Re-reads `key` and merges `conditions` into it.
  async fn record_key<T>(&self, key: &ObjectKey, conditions: Vec<Condition>) -> Result<(), ReconcileError>
  where
    T: TypedObject + Conditioned + Clone + PartialEq + Send + Sync,
  {
    if let Some(entity) = get_typed::<T>(&*self.store, key).await? {
      self.record(entity, conditions).await?;
    }
    Ok(())
  }

  async fn record<T>(&self, mut entity: T, conditions: Vec<Condition>) -> Result<T, ReconcileError>
  where
    T: TypedObject + Conditioned + Clone + PartialEq + Send + Sync,
  {
    let before = entity.clone();
    entity.set_conditions(conditions);
    self.write_if_changed(&before, entity).await
  }

  /// Writes `after` unless it equals `before`, so that converged passes
  /// produce no watch events.
  async fn write_if_changed<T>(&self, before: &T, after: T) -> Result<T, ReconcileError>
  where
    T: TypedObject + PartialEq + Send + Sync,
  {
    if *before == after {
      return Ok(after);
    }
    Ok(update_typed(&*self.store, after).await?)
  }
}

fn absorb_conflicts(key: &ObjectKey, result: Result<Requeue, ReconcileError>) -> Result<Requeue, ReconcileError> {
  match result {
    Err(err) if err.is_conflict() => {
      debug!(key = %key, error = %err, "write conflict, requeueing");
      Ok(Requeue::Immediate)
    }
    other => other,
  }
}
