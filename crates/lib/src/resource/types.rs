//! Concrete entity representations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::binding::BindingPhase;
use crate::condition::{Condition, ConditionType, ConditionedStatus};
use crate::consts::DEFAULT_CLASS_ANNOTATION;
use crate::meta::{Kind, LocalObjectReference, ObjectMeta, ObjectReference};

use super::interfaces::*;

/// What happens to a managed resource (and its external resource) once it is
/// released from its claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReclaimPolicy {
  /// Delete the managed resource and de-provision the external resource.
  Delete,
  /// Leave the managed resource released for an operator to deal with.
  #[default]
  Retain,
}

impl fmt::Display for ReclaimPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

/// Binding phase plus conditions, shared by claims and managed resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
  #[serde(default)]
  pub binding_phase: BindingPhase,
  #[serde(flatten)]
  pub conditioned: ConditionedStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpec {
  /// Portable class chosen by the user, or filled in by default selection.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub portable_class_ref: Option<LocalObjectReference>,
  /// Non-portable class resolved from the portable class. Set at most once.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub class_ref: Option<ObjectReference>,
  /// Managed resource this claim is bound to. Immutable once set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resource_ref: Option<ObjectReference>,
  /// Secret, in the claim's namespace, that receives connection details.
  #[serde(default)]
  pub write_connection_secret_to_ref: LocalObjectReference,
}

/// A claim of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericClaim {
  pub kind: Kind,
  pub metadata: ObjectMeta,
  #[serde(default)]
  pub spec: ClaimSpec,
  #[serde(default)]
  pub status: BindingStatus,
}

impl GenericClaim {
  pub fn new(kind: Kind, namespace: &str, name: impl Into<String>) -> Self {
    Self {
      kind,
      metadata: ObjectMeta::named(Some(namespace), name),
      spec: ClaimSpec::default(),
      status: BindingStatus::default(),
    }
  }

  pub fn with_portable_class(mut self, name: impl Into<String>) -> Self {
    self.spec.portable_class_ref = Some(LocalObjectReference::new(name));
    self
  }

  pub fn with_connection_secret(mut self, name: impl Into<String>) -> Self {
    self.spec.write_connection_secret_to_ref = LocalObjectReference::new(name);
    self
  }

  /// Name of the secret that should receive connection details. Falls back to
  /// the claim's own name when no target is set.
  pub fn connection_secret_name(&self) -> &str {
    if self.spec.write_connection_secret_to_ref.is_empty() {
      &self.metadata.name
    } else {
      &self.spec.write_connection_secret_to_ref.name
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSpec {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub class_ref: Option<ObjectReference>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub claim_ref: Option<ObjectReference>,
  #[serde(default)]
  pub write_connection_secret_to_ref: LocalObjectReference,
  #[serde(default)]
  pub reclaim_policy: ReclaimPolicy,
  /// Provider-specific parameters, opaque to the binding core.
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub parameters: serde_json::Value,
}

/// A managed resource of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericManaged {
  pub kind: Kind,
  pub metadata: ObjectMeta,
  #[serde(default)]
  pub spec: ManagedSpec,
  #[serde(default)]
  pub status: BindingStatus,
}

impl GenericManaged {
  pub fn new(kind: Kind, namespace: Option<&str>, name: impl Into<String>) -> Self {
    Self {
      kind,
      metadata: ObjectMeta::named(namespace, name),
      spec: ManagedSpec::default(),
      status: BindingStatus::default(),
    }
  }

  pub fn with_class(mut self, class: ObjectReference) -> Self {
    self.spec.class_ref = Some(class);
    self
  }

  pub fn with_reclaim_policy(mut self, policy: ReclaimPolicy) -> Self {
    self.spec.reclaim_policy = policy;
    self
  }

  pub fn with_connection_secret(mut self, name: impl Into<String>) -> Self {
    self.spec.write_connection_secret_to_ref = LocalObjectReference::new(name);
    self
  }

  /// Marks the external resource as provisioned and ready for use.
  pub fn ready(mut self) -> Self {
    self.status.conditioned.set_conditions([Condition::available()]);
    self
  }

  /// Name of the secret this resource writes its connection details to.
  pub fn connection_secret_name(&self) -> &str {
    if self.spec.write_connection_secret_to_ref.is_empty() {
      &self.metadata.name
    } else {
      &self.spec.write_connection_secret_to_ref.name
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSpecTemplate {
  #[serde(default)]
  pub reclaim_policy: ReclaimPolicy,
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub parameters: serde_json::Value,
}

/// A non-portable (provider-specific) class of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericNonPortableClass {
  pub kind: Kind,
  pub metadata: ObjectMeta,
  #[serde(default)]
  pub spec_template: ClassSpecTemplate,
}

impl GenericNonPortableClass {
  pub fn new(kind: Kind, namespace: Option<&str>, name: impl Into<String>) -> Self {
    Self {
      kind,
      metadata: ObjectMeta::named(namespace, name),
      spec_template: ClassSpecTemplate::default(),
    }
  }
}

/// A portable class of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericPortableClass {
  pub kind: Kind,
  pub metadata: ObjectMeta,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub class_ref: Option<ObjectReference>,
}

impl GenericPortableClass {
  pub fn new(kind: Kind, namespace: &str, name: impl Into<String>, class: Option<ObjectReference>) -> Self {
    Self {
      kind,
      metadata: ObjectMeta::named(Some(namespace), name),
      class_ref: class,
    }
  }

  pub fn as_default(mut self) -> Self {
    self
      .metadata
      .annotations
      .insert(DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string());
    self
  }

  pub fn is_default(&self) -> bool {
    crate::class::is_default(&self.metadata)
  }
}

/// An ordered list of portable classes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericPortableClassList {
  pub items: Vec<GenericPortableClass>,
}

macro_rules! impl_meta_accessor {
  ($ty:ty) => {
    impl ObjectMetaAccessor for $ty {
      fn kind(&self) -> &Kind {
        &self.kind
      }

      fn meta(&self) -> &ObjectMeta {
        &self.metadata
      }

      fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
      }
    }
  };
}

macro_rules! impl_bindable_conditioned {
  ($ty:ty) => {
    impl Bindable for $ty {
      fn set_binding_phase(&mut self, phase: BindingPhase) {
        self.status.binding_phase = phase;
      }

      fn binding_phase(&self) -> BindingPhase {
        self.status.binding_phase
      }
    }

    impl Conditioned for $ty {
      fn set_conditions(&mut self, conditions: Vec<Condition>) {
        self.status.conditioned.set_conditions(conditions);
      }

      fn get_condition(&self, kind: ConditionType) -> Condition {
        self.status.conditioned.get_condition(kind)
      }
    }
  };
}

impl_meta_accessor!(GenericClaim);
impl_meta_accessor!(GenericManaged);
impl_meta_accessor!(GenericNonPortableClass);
impl_meta_accessor!(GenericPortableClass);

impl_bindable_conditioned!(GenericClaim);
impl_bindable_conditioned!(GenericManaged);

impl PortableClassReferencer for GenericClaim {
  fn set_portable_class_reference(&mut self, reference: Option<LocalObjectReference>) {
    self.spec.portable_class_ref = reference;
  }

  fn portable_class_reference(&self) -> Option<&LocalObjectReference> {
    self.spec.portable_class_ref.as_ref()
  }
}

impl NonPortableClassReferencer for GenericClaim {
  fn set_non_portable_class_reference(&mut self, reference: Option<ObjectReference>) {
    self.spec.class_ref = reference;
  }

  fn non_portable_class_reference(&self) -> Option<&ObjectReference> {
    self.spec.class_ref.as_ref()
  }
}

impl ManagedResourceReferencer for GenericClaim {
  fn set_resource_reference(&mut self, reference: Option<ObjectReference>) {
    self.spec.resource_ref = reference;
  }

  fn resource_reference(&self) -> Option<&ObjectReference> {
    self.spec.resource_ref.as_ref()
  }
}

impl ConnectionSecretWriterTo for GenericClaim {
  fn set_write_connection_secret_to_reference(&mut self, reference: LocalObjectReference) {
    self.spec.write_connection_secret_to_ref = reference;
  }

  fn write_connection_secret_to_reference(&self) -> &LocalObjectReference {
    &self.spec.write_connection_secret_to_ref
  }
}

impl Claim for GenericClaim {}

impl NonPortableClassReferencer for GenericManaged {
  fn set_non_portable_class_reference(&mut self, reference: Option<ObjectReference>) {
    self.spec.class_ref = reference;
  }

  fn non_portable_class_reference(&self) -> Option<&ObjectReference> {
    self.spec.class_ref.as_ref()
  }
}

impl ClaimReferencer for GenericManaged {
  fn set_claim_reference(&mut self, reference: Option<ObjectReference>) {
    self.spec.claim_ref = reference;
  }

  fn claim_reference(&self) -> Option<&ObjectReference> {
    self.spec.claim_ref.as_ref()
  }
}

impl ConnectionSecretWriterTo for GenericManaged {
  fn set_write_connection_secret_to_reference(&mut self, reference: LocalObjectReference) {
    self.spec.write_connection_secret_to_ref = reference;
  }

  fn write_connection_secret_to_reference(&self) -> &LocalObjectReference {
    &self.spec.write_connection_secret_to_ref
  }
}

impl Reclaimer for GenericManaged {
  fn set_reclaim_policy(&mut self, policy: ReclaimPolicy) {
    self.spec.reclaim_policy = policy;
  }

  fn reclaim_policy(&self) -> ReclaimPolicy {
    self.spec.reclaim_policy
  }
}

impl Managed for GenericManaged {}

impl Reclaimer for GenericNonPortableClass {
  fn set_reclaim_policy(&mut self, policy: ReclaimPolicy) {
    self.spec_template.reclaim_policy = policy;
  }

  fn reclaim_policy(&self) -> ReclaimPolicy {
    self.spec_template.reclaim_policy
  }
}

impl NonPortableClass for GenericNonPortableClass {}

impl NonPortableClassReferencer for GenericPortableClass {
  fn set_non_portable_class_reference(&mut self, reference: Option<ObjectReference>) {
    self.class_ref = reference;
  }

  fn non_portable_class_reference(&self) -> Option<&ObjectReference> {
    self.class_ref.as_ref()
  }
}

impl PortableClass for GenericPortableClass {}

impl PortableClassLister for GenericPortableClassList {
  type Item = GenericPortableClass;

  fn set_portable_class_items(&mut self, items: Vec<GenericPortableClass>) {
    self.items = items;
  }

  fn portable_class_items(&self) -> &[GenericPortableClass] {
    &self.items
  }
}

impl PortableClassList for GenericPortableClassList {}
