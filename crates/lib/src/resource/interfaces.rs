//! Capability traits.
//!
//! The composite traits have no blanket impls: each concrete entity opts in
//! explicitly, so a type is a `Claim` only because it says so.

use crate::binding::BindingPhase;
use crate::condition::{Condition, ConditionType};
use crate::meta::{Kind, LocalObjectReference, ObjectKey, ObjectMeta, ObjectReference};

use super::ReclaimPolicy;

/// Anything persisted in the object store.
pub trait ObjectMetaAccessor {
  fn kind(&self) -> &Kind;
  fn meta(&self) -> &ObjectMeta;
  fn meta_mut(&mut self) -> &mut ObjectMeta;

  fn key(&self) -> ObjectKey {
    let meta = self.meta();
    ObjectKey {
      kind: self.kind().clone(),
      namespace: meta.namespace.clone(),
      name: meta.name.clone(),
    }
  }

  fn reference(&self) -> ObjectReference {
    ObjectReference::to(self.kind(), self.meta())
  }
}

/// A resource that may be bound to another resource.
pub trait Bindable {
  fn set_binding_phase(&mut self, phase: BindingPhase);
  fn binding_phase(&self) -> BindingPhase;
}

/// A resource that reports status conditions.
pub trait Conditioned {
  fn set_conditions(&mut self, conditions: Vec<Condition>);
  fn get_condition(&self, kind: ConditionType) -> Condition;
}

/// A resource that may reference a claim.
pub trait ClaimReferencer {
  fn set_claim_reference(&mut self, reference: Option<ObjectReference>);
  fn claim_reference(&self) -> Option<&ObjectReference>;
}

/// A resource that may reference a non-portable class.
pub trait NonPortableClassReferencer {
  fn set_non_portable_class_reference(&mut self, reference: Option<ObjectReference>);
  fn non_portable_class_reference(&self) -> Option<&ObjectReference>;
}

/// A resource that may reference a portable class in its own namespace.
pub trait PortableClassReferencer {
  fn set_portable_class_reference(&mut self, reference: Option<LocalObjectReference>);
  fn portable_class_reference(&self) -> Option<&LocalObjectReference>;
}

/// A resource that may reference a concrete managed resource.
pub trait ManagedResourceReferencer {
  fn set_resource_reference(&mut self, reference: Option<ObjectReference>);
  fn resource_reference(&self) -> Option<&ObjectReference>;
}

/// A resource that writes a connection secret.
pub trait ConnectionSecretWriterTo {
  fn set_write_connection_secret_to_reference(&mut self, reference: LocalObjectReference);
  fn write_connection_secret_to_reference(&self) -> &LocalObjectReference;
}

/// A resource that carries a reclaim policy.
pub trait Reclaimer {
  fn set_reclaim_policy(&mut self, policy: ReclaimPolicy);
  fn reclaim_policy(&self) -> ReclaimPolicy;
}

/// A list of portable classes.
pub trait PortableClassLister {
  type Item: PortableClass;

  fn set_portable_class_items(&mut self, items: Vec<Self::Item>);
  fn portable_class_items(&self) -> &[Self::Item];
}

/// An abstract resource claim (e.g. an SQL database) that may be bound to a
/// concrete managed resource (e.g. a CloudSQL instance).
pub trait Claim:
  ObjectMetaAccessor
  + PortableClassReferencer
  + NonPortableClassReferencer
  + ManagedResourceReferencer
  + ConnectionSecretWriterTo
  + Conditioned
  + Bindable
{
}

/// A concrete managed resource.
pub trait Managed:
  ObjectMetaAccessor
  + NonPortableClassReferencer
  + ClaimReferencer
  + ConnectionSecretWriterTo
  + Reclaimer
  + Conditioned
  + Bindable
{
}

/// Provisioning configuration for managed resources of one kind.
pub trait NonPortableClass: ObjectMetaAccessor + Reclaimer {}

/// A claim-kind-scoped default pointing at a non-portable class.
pub trait PortableClass: ObjectMetaAccessor + NonPortableClassReferencer {}

/// A list of portable classes.
pub trait PortableClassList: PortableClassLister {}

