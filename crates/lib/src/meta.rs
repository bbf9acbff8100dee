//! Object identity and references.
//!
//! Every entity handled by the control plane carries an [`ObjectMeta`] and is
//! addressed by an [`ObjectKey`] (kind, namespace, name). Cross-object links
//! are expressed with [`ObjectReference`] (possibly cross-namespace) or
//! [`LocalObjectReference`] (same namespace as the referencing object).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a concrete object kind, e.g. `MySQLInstance`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(pub String);

impl Kind {
  pub fn new(kind: impl Into<String>) -> Self {
    Self(kind.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Identity of an object in the store.
///
/// The derived ordering (kind, namespace, name) is the "identity ascending"
/// order used to break ties deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
  pub kind: Kind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub namespace: Option<String>,
  pub name: String,
}

impl ObjectKey {
  pub fn new(kind: Kind, namespace: Option<&str>, name: impl Into<String>) -> Self {
    Self {
      kind,
      namespace: namespace.map(str::to_string),
      name: name.into(),
    }
  }
}

impl fmt::Display for ObjectKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.namespace {
      Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
      None => write!(f, "{}/{}", self.kind, self.name),
    }
  }
}

/// Standard object metadata.
///
/// `uid`, `resource_version` and `creation_timestamp` are owned by the store.
/// A `resource_version` of zero means the object has never been persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub namespace: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub uid: Option<String>,
  #[serde(default)]
  pub resource_version: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub creation_timestamp: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deletion_timestamp: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub finalizers: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub labels: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
  pub fn named(namespace: Option<&str>, name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      namespace: namespace.map(str::to_string),
      ..Self::default()
    }
  }

  pub fn is_deleting(&self) -> bool {
    self.deletion_timestamp.is_some()
  }

  pub fn has_finalizer(&self, finalizer: &str) -> bool {
    self.finalizers.iter().any(|f| f == finalizer)
  }

  /// Adds a finalizer. Returns true if the metadata changed.
  pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
    if self.has_finalizer(finalizer) {
      return false;
    }
    self.finalizers.push(finalizer.to_string());
    true
  }

  /// Removes a finalizer. Returns true if the metadata changed.
  pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
    let before = self.finalizers.len();
    self.finalizers.retain(|f| f != finalizer);
    before != self.finalizers.len()
  }
}

/// A reference to an object of any kind, possibly in another namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
  pub kind: Kind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub namespace: Option<String>,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub uid: Option<String>,
}

impl ObjectReference {
  pub fn to(kind: &Kind, meta: &ObjectMeta) -> Self {
    Self {
      kind: kind.clone(),
      namespace: meta.namespace.clone(),
      name: meta.name.clone(),
      uid: meta.uid.clone(),
    }
  }

  pub fn key(&self) -> ObjectKey {
    ObjectKey {
      kind: self.kind.clone(),
      namespace: self.namespace.clone(),
      name: self.name.clone(),
    }
  }

  /// Whether this reference points at the given object.
  ///
  /// Kind, namespace and name must match. When both the reference and the
  /// object carry a uid they must match too, so a recreated object with the
  /// same name is not mistaken for the original.
  pub fn refers_to(&self, kind: &Kind, meta: &ObjectMeta) -> bool {
    if &self.kind != kind || self.namespace != meta.namespace || self.name != meta.name {
      return false;
    }
    match (&self.uid, &meta.uid) {
      (Some(a), Some(b)) => a == b,
      _ => true,
    }
  }

  /// Whether two references name the same object (uid-aware like [`refers_to`](Self::refers_to)).
  pub fn same_target(&self, other: &ObjectReference) -> bool {
    if self.key() != other.key() {
      return false;
    }
    match (&self.uid, &other.uid) {
      (Some(a), Some(b)) => a == b,
      _ => true,
    }
  }
}

impl fmt::Display for ObjectReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.key())
  }
}

/// A reference to an object in the same namespace as the referrer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalObjectReference {
  #[serde(default)]
  pub name: String,
}

impl LocalObjectReference {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  pub fn is_empty(&self) -> bool {
    self.name.is_empty()
  }
}
