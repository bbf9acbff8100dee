//! Connection secret propagation from managed resources to claims.

use claimbind_lib::condition::{ConditionReason, ConditionStatus, ConditionType};
use claimbind_lib::meta::Kind;
use claimbind_lib::resource::{Conditioned, GenericClaim, ReclaimPolicy};
use claimbind_lib::secret::{ConnectionSecret, SecretKey, SecretStore};
use claimbind_lib::store::create_typed;

use super::common::{CLAIM_KIND, Harness};

#[tokio::test]
async fn secret_is_copied_once_the_resource_publishes_it() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  let claim = h.claim("app", "db").await;

  let stats = h.settle().await;
  assert_eq!(stats.waiting, 1);
  let pending = h.get_claim(&claim).await.unwrap();
  let ready = pending.get_condition(ConditionType::Ready);
  assert_eq!(ready.status, ConditionStatus::False);
  assert_eq!(ready.reason, Some(ConditionReason::Creating));
  assert!(h.secrets.get(&SecretKey::new("app", "db")).await.unwrap().is_none());

  h.publish(&managed, "s3cret").await;
  let stats = h.settle().await;
  assert_eq!(stats.waiting, 0);

  let claim = h.get_claim(&claim).await.unwrap();
  assert_eq!(claim.get_condition(ConditionType::Ready).reason, Some(ConditionReason::Available));
  let copy = h.secrets.get(&SecretKey::new("app", "db")).await.unwrap().unwrap();
  assert_eq!(copy.data["password"], "s3cret");
  let provenance = copy.provenance.unwrap();
  assert_eq!(provenance.source, SecretKey::source_of(&managed));
  assert_eq!(provenance.source_version, 1);
}

#[tokio::test]
async fn newer_source_refreshes_the_copy() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  h.publish(&managed, "first").await;
  h.claim("app", "db").await;
  h.settle().await;

  h.publish(&managed, "second").await;
  h.settle().await;

  let copy = h.secrets.get(&SecretKey::new("app", "db")).await.unwrap().unwrap();
  assert_eq!(copy.data["password"], "second");
  assert_eq!(copy.version, 2);
  assert_eq!(copy.provenance.unwrap().source_version, 2);
}

#[tokio::test]
async fn converged_pair_does_not_rewrite_the_secret() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  h.publish(&managed, "pw").await;
  h.claim("app", "db").await;
  h.settle().await;
  h.settle().await;

  let copy = h.secrets.get(&SecretKey::new("app", "db")).await.unwrap().unwrap();
  assert_eq!(copy.version, 1);
}

#[tokio::test]
async fn foreign_secret_at_target_is_not_overwritten() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  h.publish(&managed, "pw").await;
  let target = SecretKey::new("app", "db");
  h.secrets
    .put(&target, ConnectionSecret::with_data([("password", "hand-written")]))
    .await
    .unwrap();
  let claim = h.claim("app", "db").await;

  let stats = h.settle().await;
  assert!(stats.abandoned >= 1);

  let claim = h.get_claim(&claim).await.unwrap();
  let synced = claim.get_condition(ConditionType::Synced);
  assert_eq!(synced.status, ConditionStatus::False);
  assert_eq!(synced.reason, Some(ConditionReason::SecretPropagationConflict));
  assert_eq!(claim.get_condition(ConditionType::Ready).reason, Some(ConditionReason::Unavailable));

  let untouched = h.secrets.get(&target).await.unwrap().unwrap();
  assert_eq!(untouched.data["password"], "hand-written");
}

#[tokio::test]
async fn edited_copy_is_kept_when_the_source_moves_on() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  h.publish(&managed, "first").await;
  let claim = h.claim("app", "db").await;
  h.settle().await;

  let target = SecretKey::new("app", "db");
  let mut copy = h.secrets.get(&target).await.unwrap().unwrap();
  copy.data.insert("password".to_string(), "operator-edit".to_string());
  h.secrets.put(&target, copy).await.unwrap();

  h.publish(&managed, "second").await;
  let stats = h.settle().await;
  assert!(stats.abandoned >= 1);

  let claim = h.get_claim(&claim).await.unwrap();
  assert_eq!(
    claim.get_condition(ConditionType::Synced).reason,
    Some(ConditionReason::SecretPropagationConflict)
  );
  let kept = h.secrets.get(&target).await.unwrap().unwrap();
  assert_eq!(kept.data["password"], "operator-edit");
}

#[tokio::test]
async fn secret_goes_to_the_claims_chosen_name() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Retain).await;
  let managed = h.resource("sql-1", &class, 0).await;
  h.publish(&managed, "pw").await;
  let claim = GenericClaim::new(Kind::new(CLAIM_KIND), "app", "db").with_connection_secret("db-conn");
  create_typed(&*h.store, claim).await.unwrap();
  h.settle().await;

  assert!(h.secrets.get(&SecretKey::new("app", "db")).await.unwrap().is_none());
  let copy = h.secrets.get(&SecretKey::new("app", "db-conn")).await.unwrap().unwrap();
  assert_eq!(copy.data["password"], "pw");
}
