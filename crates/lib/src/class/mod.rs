//! Class resolution.
//!
//! A claim names (or defaults to) a portable class in its namespace; the
//! portable class points at a non-portable class. Resolution writes the
//! non-portable reference onto the claim exactly once: a claim that already
//! carries one is never re-resolved, even if the available defaults change.
//!
//! # Default selection
//!
//! When a claim names no portable class, the portable classes of the claim's
//! kind in its namespace are consulted:
//!
//! 1. exactly one annotated `claimbind.io/is-default-class: "true"` wins;
//! 2. otherwise, if exactly one portable class exists, it is used;
//! 3. anything else (none, or an ambiguous set) fails resolution.

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::DEFAULT_CLASS_ANNOTATION;
use crate::meta::{Kind, LocalObjectReference, ObjectKey, ObjectMeta, ObjectReference};
use crate::resource::{
  GenericClaim, GenericNonPortableClass, GenericPortableClass, GenericPortableClassList, KindRegistry,
  NonPortableClassReferencer, ObjectMetaAccessor, PortableClassLister, PortableClassReferencer, RegistryError,
};
use crate::store::{ObjectStore, StoreError, get_typed, list_typed};

#[derive(Debug, Error)]
pub enum ClassResolutionError {
  #[error("no portable class of kind {kind} exists in namespace {namespace}")]
  NoDefaultClass { kind: Kind, namespace: String },

  #[error("cannot pick a default portable class of kind {kind}: candidates {candidates:?}")]
  AmbiguousDefault { kind: Kind, candidates: Vec<String> },

  #[error("portable class {0} not found")]
  PortableClassNotFound(ObjectKey),

  #[error("portable class {0} does not reference a non-portable class")]
  PortableClassUnset(ObjectKey),

  #[error("non-portable class {0} not found")]
  NonPortableClassNotFound(ObjectReference),

  #[error("portable class {portable} references {actual}, expected a {expected}")]
  WrongClassKind {
    portable: ObjectKey,
    expected: Kind,
    actual: ObjectReference,
  },

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Result of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassResolution {
  /// The claim already carried a resolved class; nothing changed.
  AlreadyResolved(ObjectReference),
  /// The claim was updated in memory and must be persisted by the caller.
  Resolved(ObjectReference),
}

/// Picks the default portable class from a list (see module docs).
pub fn select_default<'a, L: PortableClassLister>(
  list: &'a L,
  kind: &Kind,
  namespace: &str,
) -> Result<&'a L::Item, ClassResolutionError> {
  let items = list.portable_class_items();
  let flagged: Vec<&L::Item> = items.iter().filter(|c| is_default(c.meta())).collect();

  match (flagged.as_slice(), items) {
    ([only], _) => Ok(*only),
    ([], [only]) => Ok(only),
    ([], []) => Err(ClassResolutionError::NoDefaultClass {
      kind: kind.clone(),
      namespace: namespace.to_string(),
    }),
    ([], all) => Err(ClassResolutionError::AmbiguousDefault {
      kind: kind.clone(),
      candidates: all.iter().map(|c| c.meta().name.clone()).collect(),
    }),
    (many, _) => Err(ClassResolutionError::AmbiguousDefault {
      kind: kind.clone(),
      candidates: many.iter().map(|c| c.meta().name.clone()).collect(),
    }),
  }
}

/// Whether a portable class carries the default-class annotation.
pub(crate) fn is_default(meta: &ObjectMeta) -> bool {
  meta
    .annotations
    .get(DEFAULT_CLASS_ANNOTATION)
    .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Resolves the claim's non-portable class, writing it (and a defaulted
/// portable class) onto `claim`. The caller persists the claim.
pub async fn resolve_class(
  store: &dyn ObjectStore,
  registry: &KindRegistry,
  claim: &mut GenericClaim,
) -> Result<ClassResolution, ClassResolutionError> {
  if let Some(existing) = claim.non_portable_class_reference() {
    debug!(claim = %claim.key(), class = %existing, "class already resolved");
    return Ok(ClassResolution::AlreadyResolved(existing.clone()));
  }

  let binding = registry.binding_of(&claim.kind)?;
  let namespace = claim.metadata.namespace.clone().unwrap_or_default();

  let portable = match claim.portable_class_reference() {
    Some(reference) => {
      let key = ObjectKey::new(binding.portable_class.clone(), Some(&namespace), reference.name.clone());
      get_typed::<GenericPortableClass>(store, &key)
        .await?
        .ok_or(ClassResolutionError::PortableClassNotFound(key))?
    }
    None => {
      let mut list = GenericPortableClassList::default();
      let items = list_typed::<GenericPortableClass>(store, &binding.portable_class)
        .await?
        .into_iter()
        .filter(|c| c.metadata.namespace.as_deref() == Some(namespace.as_str()))
        .collect();
      list.set_portable_class_items(items);
      let chosen = select_default(&list, &binding.portable_class, &namespace)?.clone();
      debug!(claim = %claim.key(), portable_class = %chosen.metadata.name, "selected default portable class");
      chosen
    }
  };

  let Some(class_ref) = portable.non_portable_class_reference() else {
    return Err(ClassResolutionError::PortableClassUnset(portable.key()));
  };
  if class_ref.kind != binding.non_portable_class {
    return Err(ClassResolutionError::WrongClassKind {
      portable: portable.key(),
      expected: binding.non_portable_class.clone(),
      actual: class_ref.clone(),
    });
  }

  let class = get_typed::<GenericNonPortableClass>(store, &class_ref.key())
    .await?
    .filter(|c| class_ref.refers_to(&c.kind, &c.metadata))
    .ok_or_else(|| ClassResolutionError::NonPortableClassNotFound(class_ref.clone()))?;

  let resolved = class.reference();
  if claim.portable_class_reference().is_none() {
    claim.set_portable_class_reference(Some(LocalObjectReference::new(portable.metadata.name.clone())));
  }
  claim.set_non_portable_class_reference(Some(resolved.clone()));

  info!(claim = %claim.key(), class = %resolved, "resolved claim class");
  Ok(ClassResolution::Resolved(resolved))
}
