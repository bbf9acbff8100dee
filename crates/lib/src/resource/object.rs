//! The tagged variant stored by the object store.

use serde::{Deserialize, Serialize};

use crate::meta::{Kind, ObjectKey, ObjectMeta};

use super::interfaces::ObjectMetaAccessor;
use super::registry::KindRole;
use super::types::{GenericClaim, GenericManaged, GenericNonPortableClass, GenericPortableClass};

/// Any object the store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Object {
  Claim(GenericClaim),
  Managed(GenericManaged),
  PortableClass(GenericPortableClass),
  NonPortableClass(GenericNonPortableClass),
}

impl Object {
  fn accessor(&self) -> &dyn ObjectMetaAccessor {
    match self {
      Object::Claim(o) => o,
      Object::Managed(o) => o,
      Object::PortableClass(o) => o,
      Object::NonPortableClass(o) => o,
    }
  }

  fn accessor_mut(&mut self) -> &mut dyn ObjectMetaAccessor {
    match self {
      Object::Claim(o) => o,
      Object::Managed(o) => o,
      Object::PortableClass(o) => o,
      Object::NonPortableClass(o) => o,
    }
  }

  /// The role this variant plays in a kind binding.
  pub fn role(&self) -> KindRole {
    match self {
      Object::Claim(_) => KindRole::Claim,
      Object::Managed(_) => KindRole::Managed,
      Object::PortableClass(_) => KindRole::PortableClass,
      Object::NonPortableClass(_) => KindRole::NonPortableClass,
    }
  }

  pub fn kind(&self) -> &Kind {
    self.accessor().kind()
  }

  pub fn meta(&self) -> &ObjectMeta {
    self.accessor().meta()
  }

  pub fn meta_mut(&mut self) -> &mut ObjectMeta {
    self.accessor_mut().meta_mut()
  }

  pub fn key(&self) -> ObjectKey {
    self.accessor().key()
  }
}

/// Conversion between a concrete entity and the stored variant.
pub trait TypedObject: ObjectMetaAccessor + Sized {
  /// Variant name, matching the `type` tag of [`Object`].
  const VARIANT: &'static str;

  fn from_object(object: Object) -> Option<Self>;
  fn into_object(self) -> Object;
}

macro_rules! impl_typed_object {
  ($ty:ty, $variant:ident, $name:literal) => {
    impl TypedObject for $ty {
      const VARIANT: &'static str = $name;

      fn from_object(object: Object) -> Option<Self> {
        match object {
          Object::$variant(o) => Some(o),
          _ => None,
        }
      }

      fn into_object(self) -> Object {
        Object::$variant(self)
      }
    }

    impl From<$ty> for Object {
      fn from(value: $ty) -> Self {
        Object::$variant(value)
      }
    }
  };
}

impl_typed_object!(GenericClaim, Claim, "claim");
impl_typed_object!(GenericManaged, Managed, "managed");
impl_typed_object!(GenericPortableClass, PortableClass, "portableClass");
impl_typed_object!(GenericNonPortableClass, NonPortableClass, "nonPortableClass");
