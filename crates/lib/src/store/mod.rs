//! Object store abstraction.
//!
//! The store is the only shared mutable resource. It offers get, list,
//! create, conditional update and delete, plus change notification. Updates
//! are conditional on the caller's `resource_version`: a stale write fails
//! with [`StoreError::Conflict`], which is how concurrent reconcilers
//! coordinate without locks.
//!
//! # Deletion
//!
//! Deleting an object without finalizers removes it. Deleting an object with
//! finalizers only stamps its `deletion_timestamp`; it is removed by the
//! update that clears its last finalizer.

mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::meta::{Kind, ObjectKey};
use crate::resource::{Object, TypedObject};

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("object not found: {0}")]
  NotFound(ObjectKey),

  #[error("object already exists: {0}")]
  AlreadyExists(ObjectKey),

  /// Optimistic concurrency conflict. Expected under concurrent
  /// reconciliation; callers re-read and retry.
  #[error("conflict writing {key}: expected version {expected}, found {actual}")]
  Conflict { key: ObjectKey, expected: u64, actual: u64 },

  #[error("object {key} is not a {expected}")]
  WrongVariant { key: ObjectKey, expected: &'static str },

  #[error("store unavailable: {0}")]
  Unavailable(String),
}

impl StoreError {
  pub fn is_conflict(&self) -> bool {
    matches!(self, StoreError::Conflict { .. })
  }
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
  /// The object was created or updated.
  Applied(ObjectKey),
  /// The object was removed from the store.
  Deleted(ObjectKey),
}

impl WatchEvent {
  pub fn key(&self) -> &ObjectKey {
    match self {
      WatchEvent::Applied(key) | WatchEvent::Deleted(key) => key,
    }
  }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
  async fn get(&self, key: &ObjectKey) -> Result<Option<Object>, StoreError>;

  /// Lists all objects of a kind, ordered by key.
  async fn list(&self, kind: &Kind) -> Result<Vec<Object>, StoreError>;

  /// Persists a new object, assigning uid, version and creation timestamp.
  async fn create(&self, object: Object) -> Result<Object, StoreError>;

  /// Writes an object if its `resource_version` matches the stored one.
  async fn update(&self, object: Object) -> Result<Object, StoreError>;

  /// Deletes an object (see module docs). Deleting a missing object succeeds.
  async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

  fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Reads an object as a concrete entity type.
pub async fn get_typed<T: TypedObject>(store: &dyn ObjectStore, key: &ObjectKey) -> Result<Option<T>, StoreError> {
  match store.get(key).await? {
    None => Ok(None),
    Some(object) => T::from_object(object).map(Some).ok_or_else(|| StoreError::WrongVariant {
      key: key.clone(),
      expected: T::VARIANT,
    }),
  }
}

/// Lists a kind as a concrete entity type, skipping other variants.
pub async fn list_typed<T: TypedObject>(store: &dyn ObjectStore, kind: &Kind) -> Result<Vec<T>, StoreError> {
  Ok(store.list(kind).await?.into_iter().filter_map(T::from_object).collect())
}

/// Conditionally writes a concrete entity and returns the stored copy.
pub async fn update_typed<T: TypedObject>(store: &dyn ObjectStore, value: T) -> Result<T, StoreError> {
  let key = value.key();
  let stored = store.update(value.into_object()).await?;
  T::from_object(stored).ok_or(StoreError::WrongVariant {
    key,
    expected: T::VARIANT,
  })
}

/// Creates a concrete entity and returns the stored copy.
pub async fn create_typed<T: TypedObject>(store: &dyn ObjectStore, value: T) -> Result<T, StoreError> {
  let key = value.key();
  let stored = store.create(value.into_object()).await?;
  T::from_object(stored).ok_or(StoreError::WrongVariant {
    key,
    expected: T::VARIANT,
  })
}
