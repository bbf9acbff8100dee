//! Shared helpers for integration tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use claimbind_lib::config::ControllerConfig;
use claimbind_lib::meta::{Kind, ObjectKey, ObjectReference};
use claimbind_lib::reclaim::RecordingProvisioner;
use claimbind_lib::reconcile::{Controller, Reconciler, RunStats};
use claimbind_lib::resource::{
  GenericClaim, GenericManaged, GenericNonPortableClass, GenericPortableClass, KindBinding, KindRegistry,
  ObjectMetaAccessor, ReclaimPolicy, Reclaimer,
};
use claimbind_lib::retry::RetryPolicy;
use claimbind_lib::secret::{ConnectionSecret, MemorySecretStore, SecretKey, SecretStore};
use claimbind_lib::store::{MemoryStore, ObjectStore, create_typed, get_typed};

pub const CLAIM_KIND: &str = "MySQLInstance";
pub const PORTABLE_KIND: &str = "MySQLInstanceClass";
pub const MANAGED_KIND: &str = "CloudSQLInstance";
pub const CLASS_KIND: &str = "CloudSQLInstanceClass";

pub fn mysql_binding() -> KindBinding {
  KindBinding {
    claim: Kind::new(CLAIM_KIND),
    portable_class: Kind::new(PORTABLE_KIND),
    managed: Kind::new(MANAGED_KIND),
    non_portable_class: Kind::new(CLASS_KIND),
  }
}

/// Fast timings so that backoff and waits do not slow the suite down.
pub fn test_config() -> ControllerConfig {
  ControllerConfig {
    parallelism: 4,
    bind_retry: RetryPolicy::immediate(64),
    backoff: RetryPolicy {
      max_attempts: 3,
      base_delay: Duration::from_millis(1),
      max_delay: Duration::from_millis(5),
      jitter: 0.0,
    },
    resource_wait: Duration::from_millis(10),
    max_rounds: 500,
  }
}

/// A fixed point in time plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
  Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// In-memory stores, registry and provisioner wired together.
pub struct Harness {
  pub store: Arc<MemoryStore>,
  pub secrets: Arc<MemorySecretStore>,
  pub provisioner: Arc<RecordingProvisioner>,
  pub registry: Arc<KindRegistry>,
  pub config: ControllerConfig,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_config(test_config())
  }

  pub fn with_config(config: ControllerConfig) -> Self {
    Self {
      store: Arc::new(MemoryStore::new()),
      secrets: Arc::new(MemorySecretStore::new()),
      provisioner: Arc::new(RecordingProvisioner::new()),
      registry: Arc::new(KindRegistry::new().with(mysql_binding()).unwrap()),
      config,
    }
  }

  pub fn controller(&self) -> Controller {
    let store: Arc<dyn ObjectStore> = self.store.clone();
    let reconciler = Reconciler::new(
      store.clone(),
      self.secrets.clone(),
      self.provisioner.clone(),
      self.registry.clone(),
      &self.config,
    );
    Controller::new(Arc::new(reconciler), store, self.registry.clone(), self.config.clone())
  }

  /// Runs the controller until nothing is left to do.
  pub async fn settle(&self) -> RunStats {
    let stats = self.controller().run_until_idle().await.unwrap();
    assert!(stats.idle, "controller did not settle: {stats:?}");
    stats
  }

  pub async fn class(&self, name: &str, policy: ReclaimPolicy) -> GenericNonPortableClass {
    let mut class = GenericNonPortableClass::new(Kind::new(CLASS_KIND), Some("infra"), name);
    class.set_reclaim_policy(policy);
    create_typed(&*self.store, class).await.unwrap()
  }

  /// A portable class in `namespace` pointing at `class`, flagged default.
  pub async fn default_portable(&self, namespace: &str, name: &str, class: &GenericNonPortableClass) {
    let portable = GenericPortableClass::new(Kind::new(PORTABLE_KIND), namespace, name, Some(class_ref(class))).as_default();
    create_typed(&*self.store, portable).await.unwrap();
  }

  /// A provisioned, ready managed resource of `class` created at `at(created)`.
  pub async fn resource(&self, name: &str, class: &GenericNonPortableClass, created: i64) -> GenericManaged {
    let mut managed = GenericManaged::new(Kind::new(MANAGED_KIND), None, name)
      .with_class(class_ref(class))
      .with_reclaim_policy(class.reclaim_policy())
      .ready();
    managed.metadata.creation_timestamp = Some(at(created));
    create_typed(&*self.store, managed).await.unwrap()
  }

  pub async fn claim(&self, namespace: &str, name: &str) -> GenericClaim {
    let claim = GenericClaim::new(Kind::new(CLAIM_KIND), namespace, name);
    create_typed(&*self.store, claim).await.unwrap()
  }

  pub async fn get_claim(&self, claim: &GenericClaim) -> Option<GenericClaim> {
    get_typed(&*self.store, &claim.key()).await.unwrap()
  }

  pub async fn get_managed(&self, managed: &GenericManaged) -> Option<GenericManaged> {
    get_typed(&*self.store, &managed.key()).await.unwrap()
  }

  pub async fn managed_by_key(&self, key: &ObjectKey) -> Option<GenericManaged> {
    get_typed(&*self.store, key).await.unwrap()
  }

  /// Publishes (or republishes) connection details for `managed`.
  pub async fn publish(&self, managed: &GenericManaged, password: &str) {
    let key = SecretKey::source_of(managed);
    let current = self.secrets.get(&key).await.unwrap();
    let version = current.map(|s| s.version).unwrap_or(0);
    let mut secret = ConnectionSecret::with_data([("password", password)]);
    secret.version = version;
    self.secrets.put(&key, secret).await.unwrap();
  }

  /// A standard setup: one `Delete`-or-`Retain` class with a default
  /// portable class in `app`.
  pub async fn standard_class(&self, policy: ReclaimPolicy) -> GenericNonPortableClass {
    let class = self.class("standard", policy).await;
    self.default_portable("app", "standard", &class).await;
    class
  }
}

pub fn class_ref(class: &GenericNonPortableClass) -> ObjectReference {
  class.reference()
}
