use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::binding::BindingPhase;
use crate::config::ControllerConfig;
use crate::meta::{Kind, ObjectKey};
use crate::resource::{
  Bindable, ClaimReferencer, GenericClaim, GenericManaged, KindRegistry, KindRole, ManagedResourceReferencer,
  ObjectMetaAccessor,
};
use crate::store::{ObjectStore, StoreError, WatchEvent, get_typed, list_typed};

use super::{ReconcileError, Reconciler, Requeue};

/// Counters from one controller run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
  pub rounds: usize,
  pub reconciles: usize,
  pub failures: usize,
  /// Keys dropped after exhausting their backoff budget.
  pub abandoned: usize,
  /// Keys left waiting on something outside the store.
  pub waiting: usize,
  /// The queue drained before the round limit.
  pub idle: bool,
}

#[derive(Debug, Default)]
struct WorkQueue {
  ready: BTreeSet<ObjectKey>,
  delayed: BTreeMap<ObjectKey, Instant>,
  attempts: HashMap<ObjectKey, u32>,
  waiting: BTreeSet<ObjectKey>,
}

impl WorkQueue {
  fn push(&mut self, key: ObjectKey) {
    self.delayed.remove(&key);
    self.ready.insert(key);
  }

  fn push_after(&mut self, key: ObjectKey, due: Instant) {
    if self.ready.contains(&key) {
      return;
    }
    self
      .delayed
      .entry(key)
      .and_modify(|d| *d = (*d).min(due))
      .or_insert(due);
  }

  fn promote_due(&mut self, now: Instant) {
    let due: Vec<ObjectKey> = self
      .delayed
      .iter()
      .filter(|(_, at)| **at <= now)
      .map(|(k, _)| k.clone())
      .collect();
    for key in due {
      self.push(key);
    }
  }

  fn next_due(&self) -> Option<Instant> {
    self.delayed.values().min().copied()
  }

  fn take_ready(&mut self) -> Vec<ObjectKey> {
    std::mem::take(&mut self.ready).into_iter().collect()
  }
}

/// Drives a [`Reconciler`] from the store's watch channel.
///
/// Keys are deduplicated and processed in rounds, at most `parallelism` at a
/// time. A key is never reconciled twice concurrently: each round holds a
/// key at most once and rounds do not overlap.
pub struct Controller {
  reconciler: Arc<Reconciler>,
  store: Arc<dyn ObjectStore>,
  registry: Arc<KindRegistry>,
  config: ControllerConfig,
}

impl Controller {
  pub fn new(
    reconciler: Arc<Reconciler>,
    store: Arc<dyn ObjectStore>,
    registry: Arc<KindRegistry>,
    config: ControllerConfig,
  ) -> Self {
    Self {
      reconciler,
      store,
      registry,
      config,
    }
  }

  /// Reconciles every known key and follows the resulting changes until the
  /// queue drains or `max_rounds` is reached.
  ///
  /// Keys waiting on something outside the store are counted, not waited
  /// for, and keys that keep failing are abandoned once the backoff policy
  /// runs out of attempts.
  pub async fn run_until_idle(&self) -> Result<RunStats, ReconcileError> {
    let mut events = self.store.watch();
    let mut queue = WorkQueue::default();
    let mut stats = RunStats::default();
    self.seed(&mut queue).await?;

    loop {
      queue.promote_due(Instant::now());
      if queue.ready.is_empty() {
        match queue.next_due() {
          Some(due) => {
            tokio::time::sleep_until(due).await;
            continue;
          }
          None => {
            stats.idle = true;
            break;
          }
        }
      }
      if stats.rounds >= self.config.max_rounds {
        warn!(rounds = stats.rounds, pending = queue.ready.len(), "controller did not settle");
        break;
      }

      stats.rounds += 1;
      self.run_round(&mut queue, &mut stats, true).await;
      self.drain_events(&mut events, &mut queue).await;
    }

    stats.waiting = queue.waiting.len();
    info!(
      rounds = stats.rounds,
      reconciles = stats.reconciles,
      failures = stats.failures,
      idle = stats.idle,
      "controller run finished"
    );
    Ok(stats)
  }

  /// Runs until `shutdown` resolves. Delayed requeues are honored and
  /// failing keys are retried indefinitely at the backoff ceiling.
  pub async fn run<F>(&self, shutdown: F) -> Result<RunStats, ReconcileError>
  where
    F: Future<Output = ()>,
  {
    let mut events = self.store.watch();
    let mut queue = WorkQueue::default();
    let mut stats = RunStats::default();
    self.seed(&mut queue).await?;
    tokio::pin!(shutdown);

    loop {
      queue.promote_due(Instant::now());
      if !queue.ready.is_empty() {
        stats.rounds += 1;
        self.run_round(&mut queue, &mut stats, false).await;
        self.drain_events(&mut events, &mut queue).await;

        tokio::select! {
          biased;
          _ = &mut shutdown => break,
          _ = tokio::task::yield_now() => continue,
        }
      }

      let wake = queue
        .next_due()
        .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
      tokio::select! {
        _ = &mut shutdown => break,
        event = events.recv() => match event {
          Ok(event) => self.enqueue_event(&event, &mut queue).await,
          Err(RecvError::Lagged(skipped)) => {
            warn!(skipped = skipped, "watch lagged, resyncing");
            self.seed(&mut queue).await?;
          }
          Err(RecvError::Closed) => break,
        },
        _ = tokio::time::sleep_until(wake) => {}
      }
    }

    stats.waiting = queue.waiting.len();
    info!(rounds = stats.rounds, reconciles = stats.reconciles, "controller stopped");
    Ok(stats)
  }

  /// Queues every claim and managed resource of every registered kind.
  async fn seed(&self, queue: &mut WorkQueue) -> Result<(), StoreError> {
    for binding in self.registry.bindings() {
      for kind in [&binding.claim, &binding.managed] {
        for object in self.store.list(kind).await? {
          queue.push(object.key());
        }
      }
    }
    debug!(queued = queue.ready.len(), "seeded work queue");
    Ok(())
  }

  async fn run_round(&self, queue: &mut WorkQueue, stats: &mut RunStats, bounded: bool) {
    let keys = queue.take_ready();
    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for key in keys {
      let Ok(permit) = semaphore.clone().acquire_owned().await else {
        break;
      };
      let reconciler = self.reconciler.clone();
      join_set.spawn(async move {
        let _permit = permit;
        let result = reconciler.reconcile(&key).await;
        (key, result)
      });
    }

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((key, result)) => {
          stats.reconciles += 1;
          self.schedule(queue, stats, key, result, bounded);
        }
        Err(e) => {
          stats.failures += 1;
          error!(error = %e, "reconcile task panicked");
        }
      }
    }
  }

  fn schedule(
    &self,
    queue: &mut WorkQueue,
    stats: &mut RunStats,
    key: ObjectKey,
    result: Result<Requeue, ReconcileError>,
    bounded: bool,
  ) {
    match result {
      Ok(Requeue::None) => {
        queue.attempts.remove(&key);
        queue.waiting.remove(&key);
      }
      Ok(Requeue::Immediate) => queue.push(key),
      Ok(Requeue::After(delay)) => {
        queue.attempts.remove(&key);
        if bounded {
          queue.waiting.insert(key);
        } else {
          queue.push_after(key, Instant::now() + delay);
        }
      }
      Ok(Requeue::Backoff) | Err(_) => {
        stats.failures += 1;
        if let Err(e) = &result {
          error!(key = %key, error = %e, "reconcile failed");
        }
        queue.waiting.remove(&key);
        let attempt = queue.attempts.get(&key).copied().unwrap_or(0);
        if bounded && !self.config.backoff.should_retry(attempt) {
          warn!(key = %key, attempts = attempt + 1, "giving up on key");
          stats.abandoned += 1;
          queue.attempts.remove(&key);
          return;
        }
        let delay = self.config.backoff.delay(attempt);
        debug!(key = %key, attempt = attempt, delay = ?delay, "backing off");
        queue.attempts.insert(key.clone(), attempt.saturating_add(1));
        queue.push_after(key, Instant::now() + delay);
      }
    }
  }

  async fn drain_events(&self, events: &mut broadcast::Receiver<WatchEvent>, queue: &mut WorkQueue) {
    loop {
      match events.try_recv() {
        Ok(event) => self.enqueue_event(&event, queue).await,
        Err(TryRecvError::Lagged(skipped)) => {
          warn!(skipped = skipped, "watch lagged, resyncing");
          if let Err(e) = self.seed(queue).await {
            error!(error = %e, "resync failed");
          }
        }
        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
      }
    }
  }

  /// Queues the keys affected by a change to `event`'s object.
  async fn enqueue_event(&self, event: &WatchEvent, queue: &mut WorkQueue) {
    let key = event.key();
    match self.affected_keys(event).await {
      Ok(keys) => {
        for k in keys {
          queue.push(k);
        }
      }
      Err(e) => {
        warn!(key = %key, error = %e, "failed to expand watch event");
        queue.push(key.clone());
      }
    }
  }

  async fn affected_keys(&self, event: &WatchEvent) -> Result<Vec<ObjectKey>, StoreError> {
    let key = event.key();
    let Some(role) = self.registry.role_of(&key.kind) else {
      debug!(key = %key, "ignoring unregistered kind");
      return Ok(Vec::new());
    };
    let Ok(binding) = self.registry.binding_of(&key.kind) else {
      return Ok(Vec::new());
    };

    match role {
      KindRole::Claim => {
        // The managed side acts on claim deletion.
        let resources = list_typed::<GenericManaged>(&*self.store, &binding.managed).await?;
        let mut keys = vec![key.clone()];
        keys.extend(
          resources
            .iter()
            .filter(|m| m.claim_reference().is_some_and(|r| &r.key() == key))
            .map(|m| m.key()),
        );
        Ok(keys)
      }
      KindRole::Managed => {
        let mut keys = vec![key.clone()];
        if let WatchEvent::Applied(_) = event {
          let managed = get_typed::<GenericManaged>(&*self.store, key).await?;
          if let Some(claim) = managed.as_ref().and_then(|m| m.claim_reference()) {
            keys.push(claim.key());
          }
        }
        // Claims waiting for a resource, and claims bound to this one.
        let claims = self
          .claims_where(&binding.claim, |c| {
            (c.binding_phase() == BindingPhase::Unbound && c.resource_reference().is_none())
              || c.resource_reference().is_some_and(|r| &r.key() == key)
          })
          .await?;
        keys.extend(claims);
        Ok(keys)
      }
      KindRole::PortableClass | KindRole::NonPortableClass => {
        self
          .claims_where(&binding.claim, |c| c.binding_phase() == BindingPhase::Unbindable)
          .await
      }
    }
  }

  async fn claims_where(
    &self,
    kind: &Kind,
    filter: impl Fn(&GenericClaim) -> bool,
  ) -> Result<Vec<ObjectKey>, StoreError> {
    let claims = list_typed::<GenericClaim>(&*self.store, kind).await?;
    Ok(claims.iter().filter(|c| filter(c)).map(|c| c.key()).collect())
  }
}
