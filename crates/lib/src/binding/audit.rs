//! Consistency audit of bindings across a snapshot of objects.
//!
//! A `Bound` entity must reference a live counterpart that references it
//! back, and a managed resource may be referenced by at most one claim.
//! Half-written bindings on `Unbound` entities are transient and are not
//! reported.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::binding::phase::BindingPhase;
use crate::meta::{ObjectKey, ObjectReference};
use crate::resource::{
  Bindable, ClaimReferencer, GenericClaim, GenericManaged, ManagedResourceReferencer, NonPortableClassReferencer,
  Object, ObjectMetaAccessor,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "camelCase")]
pub enum BindingViolation {
  /// Entity is `Bound` but holds no counterpart reference.
  BoundWithoutReference { entity: ObjectKey },
  /// Reference points at an object that does not exist (or was recreated).
  DanglingReference { entity: ObjectKey, target: ObjectReference },
  /// Counterpart exists but does not point back.
  NotMutual { entity: ObjectKey, target: ObjectKey },
  /// Several claims reference the same managed resource.
  SharedResource { resource: ObjectKey, claims: Vec<ObjectKey> },
  /// Bound pair disagrees on the non-portable class.
  ClassMismatch { claim: ObjectKey, resource: ObjectKey },
}

impl fmt::Display for BindingViolation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BindingViolation::BoundWithoutReference { entity } => write!(f, "{entity} is Bound without a reference"),
      BindingViolation::DanglingReference { entity, target } => write!(f, "{entity} references missing {target}"),
      BindingViolation::NotMutual { entity, target } => write!(f, "{entity} references {target}, which does not point back"),
      BindingViolation::SharedResource { resource, claims } => {
        let claims: Vec<String> = claims.iter().map(ToString::to_string).collect();
        write!(f, "{resource} is referenced by several claims: {}", claims.join(", "))
      }
      BindingViolation::ClassMismatch { claim, resource } => write!(f, "{claim} and {resource} disagree on class"),
    }
  }
}

/// Returns every binding violation in `objects`, in a stable order.
pub fn audit_bindings(objects: &[Object]) -> Vec<BindingViolation> {
  let claims: BTreeMap<ObjectKey, &GenericClaim> = objects
    .iter()
    .filter_map(|o| match o {
      Object::Claim(c) => Some((c.key(), c)),
      _ => None,
    })
    .collect();
  let managed: BTreeMap<ObjectKey, &GenericManaged> = objects
    .iter()
    .filter_map(|o| match o {
      Object::Managed(m) => Some((m.key(), m)),
      _ => None,
    })
    .collect();

  let mut violations = Vec::new();
  let mut referrers: BTreeMap<ObjectKey, Vec<ObjectKey>> = BTreeMap::new();

  for (key, claim) in &claims {
    if let Some(r) = claim.resource_reference() {
      referrers.entry(r.key()).or_default().push(key.clone());
    }
    if claim.binding_phase() != BindingPhase::Bound {
      continue;
    }
    let Some(target) = claim.resource_reference() else {
      violations.push(BindingViolation::BoundWithoutReference { entity: key.clone() });
      continue;
    };
    match managed.get(&target.key()).filter(|m| target.refers_to(&m.kind, &m.metadata)) {
      None => violations.push(BindingViolation::DanglingReference {
        entity: key.clone(),
        target: target.clone(),
      }),
      Some(m) => {
        if !m.claim_reference().is_some_and(|r| r.refers_to(&claim.kind, &claim.metadata)) {
          violations.push(BindingViolation::NotMutual {
            entity: key.clone(),
            target: m.key(),
          });
        }
        let same_class = match (claim.non_portable_class_reference(), m.non_portable_class_reference()) {
          (Some(a), Some(b)) => a.same_target(b),
          _ => false,
        };
        if !same_class {
          violations.push(BindingViolation::ClassMismatch {
            claim: key.clone(),
            resource: m.key(),
          });
        }
      }
    }
  }

  for (key, m) in &managed {
    if m.binding_phase() != BindingPhase::Bound {
      continue;
    }
    let Some(target) = m.claim_reference() else {
      violations.push(BindingViolation::BoundWithoutReference { entity: key.clone() });
      continue;
    };
    match claims.get(&target.key()).filter(|c| target.refers_to(&c.kind, &c.metadata)) {
      None => violations.push(BindingViolation::DanglingReference {
        entity: key.clone(),
        target: target.clone(),
      }),
      Some(c) => {
        if !c.resource_reference().is_some_and(|r| r.refers_to(&m.kind, &m.metadata)) {
          violations.push(BindingViolation::NotMutual {
            entity: key.clone(),
            target: c.key(),
          });
        }
      }
    }
  }

  for (resource, claims) in referrers {
    if claims.len() > 1 {
      violations.push(BindingViolation::SharedResource { resource, claims });
    }
  }

  violations
}
