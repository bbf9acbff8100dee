//! Status conditions.
//!
//! Every controller reports health through conditions. A [`ConditionedStatus`]
//! holds at most one [`Condition`] per [`ConditionType`]; [`set_conditions`]
//! merges new observations in, only moving `last_transition_time` when the
//! status actually changes.
//!
//! An absent condition reads back as `Unknown`. Callers must treat that as
//! "not yet evaluated", never as healthy.
//!
//! [`set_conditions`]: ConditionedStatus::set_conditions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The aspect of an entity a condition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
  /// Whether the entity is usable.
  Ready,
  /// Whether the last reconcile pass succeeded.
  Synced,
}

impl fmt::Display for ConditionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConditionType::Ready => write!(f, "Ready"),
      ConditionType::Synced => write!(f, "Synced"),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
  True,
  False,
  #[default]
  Unknown,
}

impl fmt::Display for ConditionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConditionStatus::True => write!(f, "True"),
      ConditionStatus::False => write!(f, "False"),
      ConditionStatus::Unknown => write!(f, "Unknown"),
    }
  }
}

/// Machine-readable cause of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionReason {
  // Ready
  Available,
  Unavailable,
  Creating,
  Deleting,
  WaitingForResource,
  Released,

  // Synced
  ReconcileSuccess,
  ReconcileError,
  ClassResolutionFailed,
  BindingConflict,
  SecretPropagationConflict,
}

impl fmt::Display for ConditionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
  #[serde(rename = "type")]
  pub kind: ConditionType,
  pub status: ConditionStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_transition_time: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<ConditionReason>,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub message: String,
}

impl Condition {
  pub fn new(kind: ConditionType, status: ConditionStatus, reason: ConditionReason) -> Self {
    Self {
      kind,
      status,
      last_transition_time: Some(Utc::now()),
      reason: Some(reason),
      message: String::new(),
    }
  }

  /// The zero value returned for a condition that was never set.
  pub fn unknown(kind: ConditionType) -> Self {
    Self {
      kind,
      status: ConditionStatus::Unknown,
      last_transition_time: None,
      reason: None,
      message: String::new(),
    }
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = message.into();
    self
  }

  /// Equal in everything but transition time.
  pub fn equal(&self, other: &Condition) -> bool {
    self.kind == other.kind && self.status == other.status && self.reason == other.reason && self.message == other.message
  }

  pub fn available() -> Self {
    Self::new(ConditionType::Ready, ConditionStatus::True, ConditionReason::Available)
  }

  pub fn unavailable() -> Self {
    Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Unavailable)
  }

  pub fn creating() -> Self {
    Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Creating)
  }

  pub fn deleting() -> Self {
    Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Deleting)
  }

  pub fn waiting_for_resource() -> Self {
    Self::new(
      ConditionType::Ready,
      ConditionStatus::False,
      ConditionReason::WaitingForResource,
    )
    .with_message("no available managed resource matches the resolved class")
  }

  pub fn released() -> Self {
    Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Released)
  }

  pub fn reconcile_success() -> Self {
    Self::new(ConditionType::Synced, ConditionStatus::True, ConditionReason::ReconcileSuccess)
  }

  pub fn reconcile_error(err: impl fmt::Display) -> Self {
    Self::new(ConditionType::Synced, ConditionStatus::False, ConditionReason::ReconcileError).with_message(err.to_string())
  }

  pub fn class_resolution_failed(err: impl fmt::Display) -> Self {
    Self::new(
      ConditionType::Synced,
      ConditionStatus::False,
      ConditionReason::ClassResolutionFailed,
    )
    .with_message(err.to_string())
  }

  pub fn binding_conflict(err: impl fmt::Display) -> Self {
    Self::new(ConditionType::Synced, ConditionStatus::False, ConditionReason::BindingConflict).with_message(err.to_string())
  }

  pub fn secret_propagation_conflict(err: impl fmt::Display) -> Self {
    Self::new(
      ConditionType::Synced,
      ConditionStatus::False,
      ConditionReason::SecretPropagationConflict,
    )
    .with_message(err.to_string())
  }
}

/// The condition set of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionedStatus {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub conditions: Vec<Condition>,
}

impl ConditionedStatus {
  /// Returns the condition of the given type, or an `Unknown` condition if
  /// none has been set.
  pub fn get_condition(&self, kind: ConditionType) -> Condition {
    self
      .conditions
      .iter()
      .find(|c| c.kind == kind)
      .cloned()
      .unwrap_or_else(|| Condition::unknown(kind))
  }

  /// Merges conditions in, keyed by type.
  ///
  /// Same status: reason and message are refreshed, the transition time is
  /// kept. Different status: the condition is replaced and stamped now.
  pub fn set_conditions<I>(&mut self, conditions: I)
  where
    I: IntoIterator<Item = Condition>,
  {
    for incoming in conditions {
      match self.conditions.iter_mut().find(|c| c.kind == incoming.kind) {
        Some(existing) if existing.status == incoming.status => {
          existing.reason = incoming.reason;
          existing.message = incoming.message;
        }
        Some(existing) => {
          *existing = Condition {
            last_transition_time: Some(Utc::now()),
            ..incoming
          };
        }
        None => self.conditions.push(Condition {
          last_transition_time: Some(Utc::now()),
          ..incoming
        }),
      }
    }
  }

  /// Whether both sets hold equal conditions, ignoring transition times and order.
  pub fn equal(&self, other: &ConditionedStatus) -> bool {
    self.conditions.len() == other.conditions.len()
      && self
        .conditions
        .iter()
        .all(|c| other.conditions.iter().any(|o| c.equal(o)))
  }

  pub fn is_ready(&self) -> bool {
    self.get_condition(ConditionType::Ready).status == ConditionStatus::True
  }
}
