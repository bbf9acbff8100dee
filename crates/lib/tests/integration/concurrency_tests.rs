//! Racing binders and a live controller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use claimbind_lib::binding::{BindingMatcher, BindingPhase, MatchOutcome, audit_bindings};
use claimbind_lib::meta::{Kind, LocalObjectReference};
use claimbind_lib::resource::{
  Bindable, GenericClaim, GenericManaged, GenericNonPortableClass, ManagedResourceReferencer, ObjectMetaAccessor,
  ReclaimPolicy,
};
use claimbind_lib::retry::RetryPolicy;
use claimbind_lib::store::{ObjectStore, create_typed, update_typed};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use super::common::{CLAIM_KIND, Harness};

/// A claim whose class is already resolved, ready for matching.
async fn resolved_claim(h: &Harness, name: &str, class: &GenericNonPortableClass) -> GenericClaim {
  let mut claim = GenericClaim::new(Kind::new(CLAIM_KIND), "app", name);
  claim.spec.portable_class_ref = Some(LocalObjectReference::new("standard"));
  claim.spec.class_ref = Some(class.reference());
  claim.status.binding_phase = BindingPhase::Unbound;
  create_typed(&*h.store, claim).await.unwrap()
}

/// A resource already offered for binding.
async fn unbound_resource(h: &Harness, name: &str, class: &GenericNonPortableClass) -> GenericManaged {
  let mut managed = h.resource(name, class, 0).await;
  managed.status.binding_phase = BindingPhase::Unbound;
  update_typed(&*h.store, managed).await.unwrap()
}

/// Runs one matcher per claim, all at once.
async fn race(h: &Harness, claims: Vec<GenericClaim>) -> Vec<MatchOutcome> {
  let mut join_set = JoinSet::new();
  for claim in claims {
    let store: Arc<dyn ObjectStore> = h.store.clone();
    let registry = h.registry.clone();
    join_set.spawn(async move {
      let retry = RetryPolicy::immediate(64);
      BindingMatcher::new(&*store, &registry, &retry).bind(&claim.key()).await
    });
  }

  let mut outcomes = Vec::new();
  while let Some(joined) = join_set.join_next().await {
    outcomes.push(joined.unwrap().unwrap());
  }
  outcomes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_binders_of_one_claim_agree() {
  let h = Harness::new();
  let class = h.class("standard", ReclaimPolicy::Retain).await;
  let managed = unbound_resource(&h, "sql-1", &class).await;
  let claim = resolved_claim(&h, "db", &class).await;

  let outcomes = race(&h, vec![claim.clone(); 8]).await;

  for outcome in outcomes {
    match outcome {
      MatchOutcome::Bound(r) => assert!(r.refers_to(&managed.kind, &managed.metadata)),
      other => panic!("expected a binding, got {other:?}"),
    }
  }
  let managed = h.get_managed(&managed).await.unwrap();
  assert_eq!(managed.binding_phase(), BindingPhase::Bound);
  assert!(audit_bindings(&h.store.snapshot()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_resource_goes_to_exactly_one_claim() {
  let h = Harness::new();
  let class = h.class("standard", ReclaimPolicy::Retain).await;
  let managed = unbound_resource(&h, "sql-1", &class).await;
  let mut claims = Vec::new();
  for i in 0..8 {
    claims.push(resolved_claim(&h, &format!("db-{i}"), &class).await);
  }

  let outcomes = race(&h, claims.clone()).await;

  let bound = outcomes.iter().filter(|o| matches!(o, MatchOutcome::Bound(_))).count();
  assert_eq!(bound, 1);
  assert_eq!(outcomes.len() - bound, 7);

  let mut holders = Vec::new();
  for claim in &claims {
    let claim = h.get_claim(claim).await.unwrap();
    if claim.resource_reference().is_some() {
      holders.push(claim);
    }
  }
  assert_eq!(holders.len(), 1);
  let managed = h.get_managed(&managed).await.unwrap();
  assert!(
    managed
      .spec
      .claim_ref
      .unwrap()
      .refers_to(&holders[0].kind, &holders[0].metadata)
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn controller_binds_many_pairs_without_sharing() {
  let h = Harness::new();
  let class = h.standard_class(ReclaimPolicy::Delete).await;
  for i in 0..12 {
    h.resource(&format!("sql-{i:02}"), &class, i).await;
  }
  let mut claims = Vec::new();
  for i in 0..12 {
    claims.push(h.claim("app", &format!("db-{i:02}")).await);
  }

  h.settle().await;

  let mut targets = BTreeSet::new();
  for claim in &claims {
    let claim = h.get_claim(claim).await.unwrap();
    assert_eq!(claim.binding_phase(), BindingPhase::Bound, "{} not bound", claim.key());
    let target = claim.resource_reference().unwrap().key();
    let managed = h.managed_by_key(&target).await.unwrap();
    assert_eq!(managed.binding_phase(), BindingPhase::Bound);
    targets.insert(target);
  }
  assert_eq!(targets.len(), claims.len());
  assert!(audit_bindings(&h.store.snapshot()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_controller_reacts_to_new_objects_and_stops_on_shutdown() {
  let h = Harness::new();
  let controller = h.controller();
  let (stop, stopped) = oneshot::channel::<()>();

  let driver = async {
    let class = h.standard_class(ReclaimPolicy::Retain).await;
    let managed = h.resource("sql-1", &class, 0).await;
    h.publish(&managed, "pw").await;
    let claim = h.claim("app", "db").await;

    let bound = tokio::time::timeout(Duration::from_secs(10), async {
      loop {
        let current = h.get_claim(&claim).await.unwrap();
        if current.binding_phase() == BindingPhase::Bound {
          return current;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    })
    .await
    .expect("claim was not bound in time");
    stop.send(()).unwrap();
    bound
  };
  let shutdown = async {
    let _ = stopped.await;
  };

  let (stats, bound) = tokio::join!(controller.run(shutdown), driver);

  let stats = stats.unwrap();
  assert!(stats.reconciles > 0);
  assert!(bound.resource_reference().is_some());
}
