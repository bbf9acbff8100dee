//! Binding matcher.
//!
//! Pairs an unbound claim with a managed resource of the claim's resolved
//! class. The pairing is two conditional writes on independently reconciled
//! objects, so every pass is written to be resumed by the next one:
//!
//! 1. The managed resource's claim reference is written first.
//! 2. The claim's resource reference is written together with claim phase `Bound`.
//! 3. The managed resource's phase is set to `Bound`.
//!
//! If a pass stops after step 1, the next pass finds the managed resource
//! already pointing at the claim and adopts it. If it stops after step 2, the
//! claim's reference is re-confirmed and the missing phase is written. A
//! reference is never cleared to "repair" a mismatch: mismatches are
//! surfaced as [`BindError::Conflict`].
//!
//! Lost optimistic-concurrency races restart the pass from a fresh read,
//! bounded by the [`RetryPolicy`].

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::binding::phase::{BindingEvent, BindingPhase, PhaseTransitionError, apply_binding_event};
use crate::meta::{ObjectKey, ObjectReference};
use crate::resource::{
  Bindable, ClaimReferencer, GenericClaim, GenericManaged, KindRegistry, Managed, ManagedResourceReferencer,
  NonPortableClassReferencer, ObjectMetaAccessor, RegistryError,
};
use crate::retry::RetryPolicy;
use crate::store::{ObjectStore, StoreError, get_typed, list_typed, update_typed};

/// Result of a matcher run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
  /// Both sides reference each other and report `Bound`.
  Bound(ObjectReference),
  /// No eligible managed resource exists yet. Not an error: provisioning of a
  /// new resource is expected to happen out of band.
  NoAvailableResource,
}

#[derive(Debug, Error)]
pub enum BindError {
  #[error("claim {0} not found")]
  ClaimNotFound(ObjectKey),

  #[error("claim {0} has no resolved class")]
  ClassUnresolved(ObjectKey),

  #[error("claim {key} is {phase} and cannot be bound")]
  NotBindable { key: ObjectKey, phase: BindingPhase },

  /// The mutual references disagree. Indicates a bug or a manual edit and is
  /// never corrected automatically.
  #[error("binding conflict between {claim} and {resource}: {detail}")]
  Conflict {
    claim: ObjectKey,
    resource: ObjectKey,
    detail: String,
  },

  /// The referenced managed resource is gone or being deleted.
  #[error("claim {claim} references missing resource {resource}")]
  ResourceMissing { claim: ObjectKey, resource: ObjectReference },

  #[error("gave up binding {claim} after {attempts} attempts")]
  RetriesExhausted { claim: ObjectKey, attempts: u32 },

  #[error(transparent)]
  Phase(#[from] PhaseTransitionError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Store(StoreError),
}

/// Outcome of one pass: either final, or a lost race to retry.
enum PassError {
  Lost(StoreError),
  Fatal(BindError),
}

impl From<StoreError> for PassError {
  fn from(err: StoreError) -> Self {
    if err.is_conflict() {
      PassError::Lost(err)
    } else {
      PassError::Fatal(BindError::Store(err))
    }
  }
}

impl From<BindError> for PassError {
  fn from(err: BindError) -> Self {
    PassError::Fatal(err)
  }
}

impl From<PhaseTransitionError> for PassError {
  fn from(err: PhaseTransitionError) -> Self {
    PassError::Fatal(err.into())
  }
}

impl From<RegistryError> for PassError {
  fn from(err: RegistryError) -> Self {
    PassError::Fatal(err.into())
  }
}

/// Picks the managed resource a claim of class `class` should bind to.
///
/// Eligible resources are `Unbound`, unclaimed, not being deleted and of the
/// same class. Ties are broken by creation time, then identity, so that
/// concurrent matchers converge on the same candidate.
pub fn select_candidate<'a, M: Managed>(class: &ObjectReference, resources: &'a [M]) -> Option<&'a M> {
  resources
    .iter()
    .filter(|m| {
      m.binding_phase() == BindingPhase::Unbound
        && m.claim_reference().is_none()
        && !m.meta().is_deleting()
        && m.non_portable_class_reference().is_some_and(|c| c.same_target(class))
    })
    .min_by(|a, b| {
      (a.meta().creation_timestamp, a.key()).cmp(&(b.meta().creation_timestamp, b.key()))
    })
}

pub struct BindingMatcher<'a> {
  store: &'a dyn ObjectStore,
  registry: &'a KindRegistry,
  retry: &'a RetryPolicy,
}

impl<'a> BindingMatcher<'a> {
  pub fn new(store: &'a dyn ObjectStore, registry: &'a KindRegistry, retry: &'a RetryPolicy) -> Self {
    Self {
      store,
      registry,
      retry,
    }
  }

  /// Binds the claim, or re-confirms an existing binding.
  pub async fn bind(&self, claim: &ObjectKey) -> Result<MatchOutcome, BindError> {
    let mut attempt = 0;
    loop {
      match self.pass(claim).await {
        Ok(outcome) => return Ok(outcome),
        Err(PassError::Fatal(err)) => {
          if let BindError::Conflict { .. } = err {
            error!(claim = %claim, error = %err, "binding conflict");
          }
          return Err(err);
        }
        Err(PassError::Lost(err)) => {
          if !self.retry.should_retry(attempt) {
            warn!(claim = %claim, attempts = attempt + 1, "binding retries exhausted");
            return Err(BindError::RetriesExhausted {
              claim: claim.clone(),
              attempts: attempt + 1,
            });
          }
          debug!(claim = %claim, attempt = attempt, error = %err, "lost binding race, retrying");
          tokio::time::sleep(self.retry.delay(attempt)).await;
          attempt += 1;
        }
      }
    }
  }

  async fn pass(&self, key: &ObjectKey) -> Result<MatchOutcome, PassError> {
    let claim = get_typed::<GenericClaim>(self.store, key)
      .await?
      .ok_or_else(|| BindError::ClaimNotFound(key.clone()))?;

    if claim.metadata.is_deleting() {
      return Err(BindError::ClaimNotFound(key.clone()).into());
    }
    let class = claim
      .non_portable_class_reference()
      .cloned()
      .ok_or_else(|| BindError::ClassUnresolved(key.clone()))?;

    if let Some(resource) = claim.resource_reference().cloned() {
      return self.confirm(claim, &class, &resource).await;
    }

    if claim.binding_phase() != BindingPhase::Unbound {
      return Err(
        BindError::NotBindable {
          key: key.clone(),
          phase: claim.binding_phase(),
        }
        .into(),
      );
    }

    let binding = self.registry.binding_of(&claim.kind)?;
    let resources = list_typed::<GenericManaged>(self.store, &binding.managed).await?;

    // A previous pass may have claimed a resource without recording it on
    // the claim.
    if let Some(adopted) = resources
      .iter()
      .find(|m| m.claim_reference().is_some_and(|r| r.refers_to(&claim.kind, &claim.metadata)))
    {
      check_class(&claim, adopted, &class)?;
      check_resource_phase(&claim, adopted)?;
      info!(claim = %key, resource = %adopted.key(), "adopting resource that already references claim");
      let adopted = adopted.clone();
      return self.complete(claim, adopted).await;
    }

    let Some(candidate) = select_candidate(&class, &resources) else {
      debug!(claim = %key, class = %class, "no available managed resource");
      return Ok(MatchOutcome::NoAvailableResource);
    };

    let mut managed = candidate.clone();
    managed.set_claim_reference(Some(claim.reference()));
    let managed = update_typed(self.store, managed).await?;
    info!(claim = %key, resource = %managed.key(), "claimed managed resource");

    self.complete(claim, managed).await
  }

  /// Writes the claim side of a binding whose managed side is in place.
  async fn complete(&self, mut claim: GenericClaim, managed: GenericManaged) -> Result<MatchOutcome, PassError> {
    claim.set_resource_reference(Some(managed.reference()));
    apply_binding_event(&mut claim, BindingEvent::Matched)?;
    let claim = update_typed(self.store, claim).await?;
    info!(claim = %claim.key(), resource = %managed.key(), "claim bound");

    self.mark_managed_bound(managed).await
  }

  /// Re-confirms a claim that already references a managed resource,
  /// repairing whichever half of the binding is missing.
  async fn confirm(
    &self,
    mut claim: GenericClaim,
    class: &ObjectReference,
    resource: &ObjectReference,
  ) -> Result<MatchOutcome, PassError> {
    if claim.binding_phase() == BindingPhase::Released {
      return Err(
        BindError::NotBindable {
          key: claim.key(),
          phase: BindingPhase::Released,
        }
        .into(),
      );
    }

    let managed = get_typed::<GenericManaged>(self.store, &resource.key())
      .await?
      .filter(|m| resource.refers_to(&m.kind, &m.metadata) && !m.metadata.is_deleting());
    let Some(mut managed) = managed else {
      return Err(
        BindError::ResourceMissing {
          claim: claim.key(),
          resource: resource.clone(),
        }
        .into(),
      );
    };

    check_class(&claim, &managed, class)?;
    check_resource_phase(&claim, &managed)?;

    match managed.claim_reference() {
      Some(r) if r.refers_to(&claim.kind, &claim.metadata) => {}
      Some(other) => {
        return Err(
          BindError::Conflict {
            claim: claim.key(),
            resource: managed.key(),
            detail: format!("resource is claimed by {other}"),
          }
          .into(),
        );
      }
      None => {
        managed.set_claim_reference(Some(claim.reference()));
        managed = update_typed(self.store, managed).await?;
        warn!(claim = %claim.key(), resource = %managed.key(), "repaired missing claim reference on resource");
      }
    }

    if claim.binding_phase() != BindingPhase::Bound {
      apply_binding_event(&mut claim, BindingEvent::Matched)?;
      update_typed(self.store, claim).await?;
    }

    self.mark_managed_bound(managed).await
  }

  async fn mark_managed_bound(&self, mut managed: GenericManaged) -> Result<MatchOutcome, PassError> {
    let reference = managed.reference();
    if apply_binding_event(&mut managed, BindingEvent::Matched)? {
      update_typed(self.store, managed).await?;
      debug!(resource = %reference, "resource bound");
    }
    Ok(MatchOutcome::Bound(reference))
  }
}

/// A resource can only take part in a binding while `Unbound` or already
/// `Bound`; checked before either side is written.
fn check_resource_phase(claim: &GenericClaim, managed: &GenericManaged) -> Result<(), BindError> {
  match managed.binding_phase() {
    BindingPhase::Unbound | BindingPhase::Bound => Ok(()),
    phase => Err(BindError::Conflict {
      claim: claim.key(),
      resource: managed.key(),
      detail: format!("resource is {phase}"),
    }),
  }
}

fn check_class(claim: &GenericClaim, managed: &GenericManaged, class: &ObjectReference) -> Result<(), BindError> {
  match managed.non_portable_class_reference() {
    Some(c) if c.same_target(class) => Ok(()),
    other => Err(BindError::Conflict {
      claim: claim.key(),
      resource: managed.key(),
      detail: match other {
        Some(c) => format!("resource class {c} differs from claim class {class}"),
        None => format!("resource has no class, claim class is {class}"),
      },
    }),
  }
}
