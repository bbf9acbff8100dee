//! Reclaim policy enforcement after claim or resource deletion.

use claimbind_lib::binding::{BindingPhase, audit_bindings};
use claimbind_lib::condition::{ConditionReason, ConditionType};
use claimbind_lib::resource::{Bindable, Conditioned, ObjectMetaAccessor, ReclaimPolicy};
use claimbind_lib::store::ObjectStore;

use super::common::Harness;

#[tokio::test]
async fn retain_keeps_resource_after_claim_deletion() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  h.store.delete(&claim.key()).await.unwrap();
  h.settle().await;

  assert!(h.get_claim(&claim).await.is_none());
  let managed = h.get_managed(&managed).await.unwrap();
  assert_eq!(managed.binding_phase(), BindingPhase::Released);
  assert!(!managed.metadata.is_deleting());
  assert_eq!(managed.get_condition(ConditionType::Ready).reason, Some(ConditionReason::Released));
  assert!(h.provisioner.deprovisioned().is_empty());
}

#[tokio::test]
async fn delete_removes_resource_after_claim_deletion() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Delete).await;
  let managed = h.resource("sql-1", &class, 0).await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  h.store.delete(&claim.key()).await.unwrap();
  h.settle().await;

  assert!(h.get_managed(&managed).await.is_none());
  assert_eq!(h.provisioner.deprovisioned(), vec![managed.key()]);
}

#[tokio::test]
async fn released_resource_is_not_offered_to_new_claims() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  let first = h.claim("app", "db").await;
  h.settle().await;
  h.store.delete(&first.key()).await.unwrap();
  h.settle().await;

  let second = h.claim("app", "db2").await;
  let stats = h.settle().await;

  assert_eq!(stats.waiting, 1);
  let second = h.get_claim(&second).await.unwrap();
  assert_eq!(second.binding_phase(), BindingPhase::Unbound);
  let managed = h.get_managed(&managed).await.unwrap();
  assert_eq!(managed.binding_phase(), BindingPhase::Released);
  assert_eq!(managed.spec.claim_ref.unwrap().name, "db");
}

#[tokio::test]
async fn deleting_bound_resource_with_delete_policy_deprovisions_and_releases_claim() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Delete).await;
  let managed = h.resource("sql-1", &class, 0).await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  h.store.delete(&managed.key()).await.unwrap();
  h.settle().await;

  assert!(h.get_managed(&managed).await.is_none());
  assert_eq!(h.provisioner.deprovisioned(), vec![managed.key()]);

  let claim = h.get_claim(&claim).await.unwrap();
  assert_eq!(claim.binding_phase(), BindingPhase::Released);
  assert_eq!(claim.get_condition(ConditionType::Ready).reason, Some(ConditionReason::Released));
}

#[tokio::test]
async fn deleting_bound_resource_with_retain_policy_keeps_external_resource() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  h.store.delete(&managed.key()).await.unwrap();
  h.settle().await;

  assert!(h.get_managed(&managed).await.is_none());
  assert!(h.provisioner.deprovisioned().is_empty());
  let claim = h.get_claim(&claim).await.unwrap();
  assert_eq!(claim.binding_phase(), BindingPhase::Released);
  assert!(audit_bindings(&h.store.snapshot()).is_empty());
}

#[tokio::test]
async fn recreated_claim_with_same_name_does_not_inherit_binding() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  h.store.delete(&claim.key()).await.unwrap();
  let recreated = h.claim("app", "db").await;
  assert_ne!(recreated.metadata.uid, claim.metadata.uid);
  h.settle().await;

  let managed = h.get_managed(&managed).await.unwrap();
  assert_eq!(managed.binding_phase(), BindingPhase::Released);
  let recreated = h.get_claim(&recreated).await.unwrap();
  assert!(recreated.spec.resource_ref.is_none());
  assert_ne!(recreated.binding_phase(), BindingPhase::Bound);
}
