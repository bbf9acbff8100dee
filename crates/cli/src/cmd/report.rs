//! Binding summary shared by `reconcile` and `check`.

use serde::Serialize;

use claimbind_lib::binding::{BindingPhase, BindingViolation};
use claimbind_lib::condition::{ConditionReason, ConditionType};
use claimbind_lib::resource::{Bindable, ClaimReferencer, Conditioned, ManagedResourceReferencer, Object};

use crate::output::{self, print_pair, print_success, print_warning};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRow {
  pub key: String,
  pub phase: BindingPhase,
  /// The counterpart this entity references, if any.
  pub bound_to: Option<String>,
  pub ready: Option<ConditionReason>,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BindingReport {
  pub claims: Vec<EntityRow>,
  pub resources: Vec<EntityRow>,
  pub violations: Vec<BindingViolation>,
}

impl BindingReport {
  pub fn new(objects: &[Object], violations: Vec<BindingViolation>) -> Self {
    let mut claims = Vec::new();
    let mut resources = Vec::new();
    for object in objects {
      match object {
        Object::Claim(c) => {
          let ready = c.get_condition(ConditionType::Ready);
          claims.push(EntityRow {
            key: object.key().to_string(),
            phase: c.binding_phase(),
            bound_to: c.resource_reference().map(ToString::to_string),
            ready: ready.reason,
            message: ready.message,
          });
        }
        Object::Managed(m) => {
          let ready = m.get_condition(ConditionType::Ready);
          resources.push(EntityRow {
            key: object.key().to_string(),
            phase: m.binding_phase(),
            bound_to: m.claim_reference().map(ToString::to_string),
            ready: ready.reason,
            message: ready.message,
          });
        }
        Object::PortableClass(_) | Object::NonPortableClass(_) => {}
      }
    }
    Self {
      claims,
      resources,
      violations,
    }
  }

  pub fn is_consistent(&self) -> bool {
    self.violations.is_empty()
  }

  pub fn print(&self) {
    print_section("Claims", &self.claims);
    print_section("Resources", &self.resources);

    println!();
    if self.violations.is_empty() {
      print_success("Bindings are consistent");
    } else {
      for violation in &self.violations {
        print_warning(&violation.to_string());
      }
    }
  }
}

fn print_section(title: &str, rows: &[EntityRow]) {
  if rows.is_empty() {
    return;
  }
  println!();
  println!("{title}:");
  for row in rows {
    let mut note = format!("({})", row.phase);
    if let Some(reason) = row.ready {
      note = format!("({}, {})", row.phase, reason);
    }
    print_pair(&row.key, row.bound_to.as_deref(), &note);
    if !row.message.is_empty() {
      println!("      {} {}", output::symbols::INFO, row.message);
    }
  }
}
