//! Claim to managed resource binding, driven through the controller.

use claimbind_lib::binding::{BindingPhase, BindingViolation, audit_bindings};
use claimbind_lib::condition::{ConditionReason, ConditionStatus, ConditionType};
use claimbind_lib::consts::{DEFAULT_CLASS_ANNOTATION, RECLAIM_FINALIZER};
use claimbind_lib::meta::{Kind, ObjectKey};
use claimbind_lib::resource::{
  Bindable, Conditioned, GenericClaim, GenericPortableClass, ManagedResourceReferencer, NonPortableClassReferencer,
  ObjectMetaAccessor, ReclaimPolicy,
};
use claimbind_lib::secret::{SecretKey, SecretStore};
use claimbind_lib::store::{create_typed, get_typed, update_typed};

use super::common::{CLAIM_KIND, Harness, PORTABLE_KIND, class_ref};

#[tokio::test]
async fn claim_binds_and_receives_connection_secret() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  h.publish(&managed, "hunter2").await;
  let claim = h.claim("app", "db").await;

  h.settle().await;

  let claim = h.get_claim(&claim).await.unwrap();
  let managed = h.get_managed(&managed).await.unwrap();
  assert_eq!(claim.binding_phase(), BindingPhase::Bound);
  assert_eq!(managed.binding_phase(), BindingPhase::Bound);
  assert_eq!(claim.spec.portable_class_ref.as_ref().unwrap().name, "standard");
  assert!(claim.spec.class_ref.as_ref().unwrap().refers_to(&class.kind, &class.metadata));
  assert!(managed.metadata.has_finalizer(RECLAIM_FINALIZER));

  let ready = claim.get_condition(ConditionType::Ready);
  assert_eq!(ready.status, ConditionStatus::True);
  assert_eq!(claim.get_condition(ConditionType::Synced).status, ConditionStatus::True);

  let secret = h.secrets.get(&SecretKey::new("app", "db")).await.unwrap().unwrap();
  assert_eq!(secret.data["password"], "hunter2");

  let snapshot = h.store.snapshot();
  assert!(audit_bindings(&snapshot).is_empty());
}

#[tokio::test]
async fn oldest_resource_wins_regardless_of_observation_order() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  // R2 is stored first but was created later than R1.
  let r2 = h.resource("r2", &class, 200).await;
  let r1 = h.resource("r1", &class, 100).await;
  let claim = h.claim("app", "db").await;

  h.settle().await;

  let claim = h.get_claim(&claim).await.unwrap();
  assert!(claim.resource_reference().unwrap().refers_to(&r1.kind, &r1.metadata));
  let r2 = h.get_managed(&r2).await.unwrap();
  assert_eq!(r2.binding_phase(), BindingPhase::Unbound);
  assert!(r2.spec.claim_ref.is_none());
}

#[tokio::test]
async fn claim_waits_until_a_resource_appears() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let claim = h.claim("app", "db").await;

  let stats = h.settle().await;
  assert_eq!(stats.waiting, 1);
  let waiting = h.get_claim(&claim).await.unwrap();
  assert_eq!(waiting.binding_phase(), BindingPhase::Unbound);
  assert_eq!(
    waiting.get_condition(ConditionType::Ready).reason,
    Some(ConditionReason::WaitingForResource)
  );

  let managed = h.resource("sql-1", &class, 0).await;
  h.publish(&managed, "pw").await;
  h.settle().await;

  let bound = h.get_claim(&claim).await.unwrap();
  assert_eq!(bound.binding_phase(), BindingPhase::Bound);
  assert!(bound.resource_reference().unwrap().refers_to(&managed.kind, &managed.metadata));
}

#[tokio::test]
async fn unresolvable_class_is_reported_on_the_claim() {
  let h = Harness::new();
  let claim = h.claim("app", "db").await;

  let stats = h.settle().await;
  assert!(stats.failures > 0);

  let claim = h.get_claim(&claim).await.unwrap();
  assert_eq!(claim.binding_phase(), BindingPhase::Unbindable);
  let synced = claim.get_condition(ConditionType::Synced);
  assert_eq!(synced.status, ConditionStatus::False);
  assert_eq!(synced.reason, Some(ConditionReason::ClassResolutionFailed));
  assert!(!synced.message.is_empty());

  // Fixing the configuration lets the claim proceed.
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  h.resource("sql-1", &class, 0).await;
  h.settle().await;
  let claim = h.get_claim(&claim).await.unwrap();
  assert_eq!(claim.binding_phase(), BindingPhase::Bound);
  assert_eq!(claim.get_condition(ConditionType::Synced).status, ConditionStatus::True);
}

#[tokio::test]
async fn class_is_resolved_exactly_once() {
  let h = Harness::new();
  let first = h.class("first", ReclaimPolicy::Retain).await;
  h.default_portable("app", "first", &first).await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  // Swap the default to a different class.
  let second = h.class("second", ReclaimPolicy::Delete).await;
  let key = ObjectKey::new(Kind::new(PORTABLE_KIND), Some("app"), "first");
  let mut old_default: GenericPortableClass = get_typed(&*h.store, &key).await.unwrap().unwrap();
  old_default.metadata.annotations.remove(DEFAULT_CLASS_ANNOTATION);
  update_typed(&*h.store, old_default).await.unwrap();
  h.default_portable("app", "second", &second).await;
  h.settle().await;

  let claim = h.get_claim(&claim).await.unwrap();
  let resolved = claim.non_portable_class_reference().unwrap();
  assert!(resolved.refers_to(&first.kind, &first.metadata));
  assert_eq!(claim.spec.portable_class_ref.as_ref().unwrap().name, "first");
}

#[tokio::test]
async fn bound_claim_is_never_rebound() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let original = h.resource("sql-1", &class, 100).await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  // A better (older) candidate appears afterwards.
  h.resource("sql-0", &class, 0).await;
  h.settle().await;
  h.settle().await;

  let claim = h.get_claim(&claim).await.unwrap();
  assert!(claim.resource_reference().unwrap().refers_to(&original.kind, &original.metadata));
}

#[tokio::test]
async fn explicit_portable_class_overrides_default() {
  let h = Harness::new();
  let fallback = h.standard_class(ReclaimPolicy::Retain).await;
  let fast = h.class("fast", ReclaimPolicy::Retain).await;
  let portable = GenericPortableClass::new(Kind::new(PORTABLE_KIND), "app", "fast", Some(class_ref(&fast)));
  create_typed(&*h.store, portable).await.unwrap();

  h.resource("slow-1", &fallback, 0).await;
  let fast_1 = h.resource("fast-1", &fast, 10).await;
  let claim = GenericClaim::new(Kind::new(CLAIM_KIND), "app", "db").with_portable_class("fast");
  let claim = create_typed(&*h.store, claim).await.unwrap();
  h.settle().await;

  let claim = h.get_claim(&claim).await.unwrap();
  assert!(claim.resource_reference().unwrap().refers_to(&fast_1.kind, &fast_1.metadata));
}

#[tokio::test]
async fn corrupted_binding_is_surfaced_not_repaired() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  let other = h.claim("app", "other").await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  // `other` waits; `db` or `other` got sql-1. Point the loser at sql-1 by hand.
  let managed = h.get_managed(&managed).await.unwrap();
  let owner = managed.spec.claim_ref.clone().unwrap();
  let loser = if owner.name == "db" { other } else { claim };
  let mut loser = h.get_claim(&loser).await.unwrap();
  loser.spec.resource_ref = Some(managed.reference());
  loser.status.binding_phase = BindingPhase::Bound;
  let loser = update_typed(&*h.store, loser).await.unwrap();

  h.settle().await;

  let loser = h.get_claim(&loser).await.unwrap();
  let synced = loser.get_condition(ConditionType::Synced);
  assert_eq!(synced.reason, Some(ConditionReason::BindingConflict));
  assert!(loser.resource_reference().is_some());
  let managed = h.get_managed(&managed).await.unwrap();
  assert_eq!(managed.spec.claim_ref.unwrap().name, owner.name);

  let violations = audit_bindings(&h.store.snapshot());
  assert!(
    violations
      .iter()
      .any(|v| matches!(v, BindingViolation::SharedResource { .. }))
  );
}

#[tokio::test]
async fn interrupted_binding_is_completed_on_next_pass() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  // The claim-side write of the binding fails once.
  h.store.inject_unavailable(&claim.key(), 1);
  let managed = h.resource("sql-1", &class, 0).await;
  h.settle().await;

  let claim = h.get_claim(&claim).await.unwrap();
  let managed = h.get_managed(&managed).await.unwrap();
  assert_eq!(claim.binding_phase(), BindingPhase::Bound);
  assert_eq!(managed.binding_phase(), BindingPhase::Bound);
  assert!(claim.resource_reference().unwrap().refers_to(&managed.kind, &managed.metadata));
  assert!(audit_bindings(&h.store.snapshot()).is_empty());
}
