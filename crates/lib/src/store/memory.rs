//! In-memory object store.
//!
//! Thread-safe and process-local. Used by the CLI and by tests, which can
//! inject conflicts and outages per key to exercise lost races and partial
//! writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::consts::WATCH_CHANNEL_CAPACITY;
use crate::meta::{Kind, ObjectKey};
use crate::resource::Object;

use super::{ObjectStore, StoreError, WatchEvent};

#[derive(Debug, Default)]
struct State {
  objects: BTreeMap<ObjectKey, Object>,
  next_version: u64,
  injected_conflicts: HashMap<ObjectKey, usize>,
  injected_outages: HashMap<ObjectKey, usize>,
  conflicts: usize,
}

impl State {
  fn bump_version(&mut self) -> u64 {
    self.next_version += 1;
    self.next_version
  }

  fn take_injected(map: &mut HashMap<ObjectKey, usize>, key: &ObjectKey) -> bool {
    match map.get_mut(key) {
      Some(remaining) if *remaining > 0 => {
        *remaining -= 1;
        true
      }
      _ => false,
    }
  }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
  state: Arc<Mutex<State>>,
  events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
  StoreError::Unavailable("store lock poisoned".to_string())
}

impl MemoryStore {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
    Self {
      state: Arc::new(Mutex::new(State::default())),
      events,
    }
  }

  /// Makes the next `count` updates of `key` fail with a conflict.
  pub fn inject_conflicts(&self, key: &ObjectKey, count: usize) {
    if let Ok(mut state) = self.state.lock() {
      state.injected_conflicts.insert(key.clone(), count);
    }
  }

  /// Makes the next `count` updates of `key` fail as unavailable.
  pub fn inject_unavailable(&self, key: &ObjectKey, count: usize) {
    if let Ok(mut state) = self.state.lock() {
      state.injected_outages.insert(key.clone(), count);
    }
  }

  /// Number of conditional writes rejected so far, injected or real.
  pub fn conflict_count(&self) -> usize {
    self.state.lock().map(|s| s.conflicts).unwrap_or_default()
  }

  /// Snapshot of every stored object, ordered by key.
  pub fn snapshot(&self) -> Vec<Object> {
    self
      .state
      .lock()
      .map(|s| s.objects.values().cloned().collect())
      .unwrap_or_default()
  }

  fn notify(&self, event: WatchEvent) {
    trace!(event = ?event, "store event");
    // No receivers is fine: nobody is watching yet.
    let _ = self.events.send(event);
  }
}

#[async_trait]
impl ObjectStore for MemoryStore {
  async fn get(&self, key: &ObjectKey) -> Result<Option<Object>, StoreError> {
    let state = self.state.lock().map_err(poisoned)?;
    Ok(state.objects.get(key).cloned())
  }

  async fn list(&self, kind: &Kind) -> Result<Vec<Object>, StoreError> {
    let state = self.state.lock().map_err(poisoned)?;
    Ok(
      state
        .objects
        .iter()
        .filter(|(key, _)| &key.kind == kind)
        .map(|(_, object)| object.clone())
        .collect(),
    )
  }

  async fn create(&self, mut object: Object) -> Result<Object, StoreError> {
    let key = object.key();
    let stored = {
      let mut state = self.state.lock().map_err(poisoned)?;
      if state.objects.contains_key(&key) {
        return Err(StoreError::AlreadyExists(key));
      }

      let version = state.bump_version();
      let meta = object.meta_mut();
      meta.uid = Some(format!("{:032x}", rand::random::<u128>()));
      meta.resource_version = version;
      meta.deletion_timestamp = None;
      if meta.creation_timestamp.is_none() {
        meta.creation_timestamp = Some(Utc::now());
      }

      state.objects.insert(key.clone(), object.clone());
      object
    };

    debug!(key = %key, "object created");
    self.notify(WatchEvent::Applied(key));
    Ok(stored)
  }

  async fn update(&self, mut object: Object) -> Result<Object, StoreError> {
    let key = object.key();
    let (stored, removed) = {
      let mut state = self.state.lock().map_err(poisoned)?;

      if State::take_injected(&mut state.injected_outages, &key) {
        return Err(StoreError::Unavailable(format!("injected outage for {key}")));
      }

      let Some(current) = state.objects.get(&key) else {
        return Err(StoreError::NotFound(key));
      };
      let actual = current.meta().resource_version;
      let expected = object.meta().resource_version;
      let (uid, created, deleting) = (
        current.meta().uid.clone(),
        current.meta().creation_timestamp,
        current.meta().deletion_timestamp,
      );

      if expected != actual || State::take_injected(&mut state.injected_conflicts, &key) {
        state.conflicts += 1;
        return Err(StoreError::Conflict { key, expected, actual });
      }

      let version = state.bump_version();
      let meta = object.meta_mut();
      meta.uid = uid;
      meta.creation_timestamp = created;
      meta.deletion_timestamp = deleting;
      meta.resource_version = version;

      let removed = meta.is_deleting() && meta.finalizers.is_empty();
      if removed {
        state.objects.remove(&key);
      } else {
        state.objects.insert(key.clone(), object.clone());
      }
      (object, removed)
    };

    if removed {
      debug!(key = %key, "last finalizer removed, object deleted");
      self.notify(WatchEvent::Deleted(key));
    } else {
      trace!(key = %key, version = stored.meta().resource_version, "object updated");
      self.notify(WatchEvent::Applied(key));
    }
    Ok(stored)
  }

  async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
    let event = {
      let mut state = self.state.lock().map_err(poisoned)?;
      let version = state.bump_version();
      let Some(object) = state.objects.get_mut(key) else {
        return Ok(());
      };

      if object.meta().finalizers.is_empty() {
        state.objects.remove(key);
        WatchEvent::Deleted(key.clone())
      } else {
        let meta = object.meta_mut();
        if meta.deletion_timestamp.is_some() {
          return Ok(());
        }
        meta.deletion_timestamp = Some(Utc::now());
        meta.resource_version = version;
        WatchEvent::Applied(key.clone())
      }
    };

    debug!(key = %key, event = ?event, "object deleted");
    self.notify(event);
    Ok(())
  }

  fn watch(&self) -> broadcast::Receiver<WatchEvent> {
    self.events.subscribe()
  }
}
