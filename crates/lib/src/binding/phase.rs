//! Binding phase state machine.
//!
//! ```text
//!              PrerequisitesMet            Matched
//!  Unbindable ------------------> Unbound ---------> Bound
//!      ^                             |                 |
//!      |  PrerequisitesLost          | CounterpartDeleted (half-bound)
//!      +-----------------------------+                 | CounterpartDeleted
//!      |                             v                 v
//!      +-------------------------- Released <----------+
//! ```
//!
//! `Released` is terminal for the binding concern: nothing moves an entity
//! out of it except the defensive regression to `Unbindable`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::resource::Bindable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingPhase {
  /// Preconditions for binding are not met.
  #[default]
  Unbindable,
  /// Eligible for binding but not yet matched.
  Unbound,
  /// Mutual references are established.
  Bound,
  /// Was bound; the counterpart is gone.
  Released,
}

impl fmt::Display for BindingPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

/// Observations that drive phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingEvent {
  /// Class resolved (and, for managed resources, external resource ready).
  PrerequisitesMet,
  /// The matcher established both references.
  Matched,
  /// The referenced counterpart was observed deleted.
  CounterpartDeleted,
  /// The entity's own required fields became invalid.
  PrerequisitesLost,
}

impl fmt::Display for BindingEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal binding transition: {event} in phase {from}")]
pub struct PhaseTransitionError {
  pub from: BindingPhase,
  pub event: BindingEvent,
}

/// Computes the phase reached by applying `event` in phase `from`.
///
/// Re-applying an event that already holds is a no-op rather than an error,
/// so reconcile passes can be repeated.
pub fn transition(from: BindingPhase, event: BindingEvent) -> Result<BindingPhase, PhaseTransitionError> {
  use BindingEvent::*;
  use BindingPhase::*;

  match (from, event) {
    (Unbindable | Unbound, PrerequisitesMet) => Ok(Unbound),
    (Bound, PrerequisitesMet) => Ok(Bound),
    (Unbound | Bound, Matched) => Ok(Bound),
    (Unbound | Bound | Released, CounterpartDeleted) => Ok(Released),
    (_, PrerequisitesLost) => Ok(Unbindable),
    (from, event) => Err(PhaseTransitionError { from, event }),
  }
}

/// Applies an event to a bindable entity. Returns whether the phase changed.
pub fn apply_binding_event<B: Bindable + ?Sized>(
  entity: &mut B,
  event: BindingEvent,
) -> Result<bool, PhaseTransitionError> {
  let from = entity.binding_phase();
  let to = transition(from, event)?;

  if from == to {
    return Ok(false);
  }

  if event == BindingEvent::PrerequisitesLost {
    warn!(from = %from, "binding prerequisites lost, regressing to Unbindable");
  } else {
    debug!(from = %from, to = %to, event = %event, "binding phase transition");
  }

  entity.set_binding_phase(to);
  Ok(true)
}
