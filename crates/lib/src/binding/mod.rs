//! Binding of claims to managed resources.
//!
//! # Submodules
//!
//! - [`phase`] - The binding phase state machine shared by claims and managed resources
//! - [`matcher`] - Pairs an unbound claim with a managed resource
//! - [`audit`] - Detects mutual-reference violations across a set of objects

pub mod audit;
pub mod matcher;
pub mod phase;

pub use audit::{BindingViolation, audit_bindings};
pub use matcher::{BindError, BindingMatcher, MatchOutcome, select_candidate};
pub use phase::{BindingEvent, BindingPhase, PhaseTransitionError, apply_binding_event, transition};
