//! Reconciliation.
//!
//! A [`Reconciler`] runs one pass for one key: class resolution, binding,
//! secret propagation and reclaim enforcement, recording the result as
//! conditions on the entity. The [`Controller`] feeds it keys from the
//! store's watch channel.
//!
//! Domain failures (unresolvable class, binding conflict, secret conflict)
//! are recorded on the entity and answered with [`Requeue::Backoff`]. Only
//! infrastructure failures come back as [`ReconcileError`]. Lost
//! optimistic-concurrency races never escape a pass: they become
//! [`Requeue::Immediate`].

mod controller;
mod reconciler;

use std::time::Duration;

use thiserror::Error;

use crate::binding::PhaseTransitionError;
use crate::reclaim::{ProvisionError, ReclaimError};
use crate::resource::RegistryError;
use crate::secret::SecretStoreError;
use crate::store::StoreError;

pub use controller::{Controller, RunStats};
pub use reconciler::Reconciler;

/// When a key should be reconciled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
  /// Converged until the next change is observed.
  None,
  /// Re-run as soon as possible, typically after a lost write race.
  Immediate,
  /// Waiting on something outside the store's watch (e.g. a secret).
  After(Duration),
  /// Failed; re-run with per-key exponential backoff.
  Backoff,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  SecretStore(#[from] SecretStoreError),

  #[error(transparent)]
  Provision(#[from] ProvisionError),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Phase(#[from] PhaseTransitionError),
}

impl ReconcileError {
  /// Whether this is a lost optimistic-concurrency race.
  pub fn is_conflict(&self) -> bool {
    match self {
      ReconcileError::Store(e) => e.is_conflict(),
      ReconcileError::SecretStore(e) => matches!(e, SecretStoreError::Conflict { .. }),
      _ => false,
    }
  }
}

impl From<ReclaimError> for ReconcileError {
  fn from(err: ReclaimError) -> Self {
    match err {
      ReclaimError::Phase(e) => e.into(),
      ReclaimError::Provision(e) => e.into(),
      ReclaimError::Store(e) => e.into(),
    }
  }
}
