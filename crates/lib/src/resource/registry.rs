//! Kind registry.
//!
//! The controller dispatches by kind identifier. Each claim kind is registered
//! together with the portable class, managed resource and non-portable class
//! kinds that serve it, so new kinds are added by registration rather than by
//! extending a match.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::meta::Kind;

/// The kinds that cooperate to serve one claim kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindBinding {
  pub claim: Kind,
  pub portable_class: Kind,
  pub managed: Kind,
  pub non_portable_class: Kind,
}

/// The role a kind plays in a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindRole {
  Claim,
  PortableClass,
  Managed,
  NonPortableClass,
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("kind {0} is not registered")]
  Unregistered(Kind),

  #[error("kind {kind} is already registered as {role:?}")]
  Duplicate { kind: Kind, role: KindRole },
}

#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
  bindings: Vec<KindBinding>,
  roles: HashMap<Kind, (KindRole, usize)>,
}

impl KindRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a binding. Every kind may play exactly one role.
  pub fn register(&mut self, binding: KindBinding) -> Result<(), RegistryError> {
    let index = self.bindings.len();
    let entries = [
      (&binding.claim, KindRole::Claim),
      (&binding.portable_class, KindRole::PortableClass),
      (&binding.managed, KindRole::Managed),
      (&binding.non_portable_class, KindRole::NonPortableClass),
    ];

    for (i, (kind, _)) in entries.iter().enumerate() {
      if let Some((role, _)) = self.roles.get(*kind) {
        return Err(RegistryError::Duplicate {
          kind: (*kind).clone(),
          role: *role,
        });
      }
      if let Some((_, role)) = entries[..i].iter().find(|(earlier, _)| earlier == kind) {
        return Err(RegistryError::Duplicate {
          kind: (*kind).clone(),
          role: *role,
        });
      }
    }
    for (kind, role) in entries {
      self.roles.insert(kind.clone(), (role, index));
    }
    self.bindings.push(binding);
    Ok(())
  }

  pub fn with(mut self, binding: KindBinding) -> Result<Self, RegistryError> {
    self.register(binding)?;
    Ok(self)
  }

  pub fn role_of(&self, kind: &Kind) -> Option<KindRole> {
    self.roles.get(kind).map(|(role, _)| *role)
  }

  /// The binding a kind participates in, whatever its role.
  pub fn binding_of(&self, kind: &Kind) -> Result<&KindBinding, RegistryError> {
    self
      .roles
      .get(kind)
      .map(|(_, index)| &self.bindings[*index])
      .ok_or_else(|| RegistryError::Unregistered(kind.clone()))
  }

  pub fn bindings(&self) -> &[KindBinding] {
    &self.bindings
  }
}
