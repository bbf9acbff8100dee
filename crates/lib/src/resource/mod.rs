//! Entities handled by the control plane.
//!
//! Cross-cutting capabilities (bindable, conditioned, class-referencing,
//! secret-writing, reclaim-policy-bearing) are small independent traits in
//! [`interfaces`]. Each entity kind implements exactly the set it needs, and
//! the composite traits ([`Claim`], [`Managed`], ...) name those sets.
//!
//! The concrete [`GenericClaim`], [`GenericManaged`] etc. carry their
//! [`Kind`](crate::meta::Kind) as data, so any number of concrete kinds share
//! one representation. At the store boundary they are wrapped in the tagged
//! [`Object`] variant.

mod interfaces;
mod object;
mod registry;
mod types;

pub use interfaces::*;
pub use object::{Object, TypedObject};
pub use registry::{KindBinding, KindRegistry, KindRole, RegistryError};
pub use types::*;
