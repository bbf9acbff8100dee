//! claimbind-lib: binding and lifecycle core of a claim-based control plane
//!
//! Users file *claims* for abstract capabilities ("a MySQL database"). The
//! control plane binds each claim to a concrete *managed resource* of the
//! class the claim resolves to, propagates the resource's connection secret
//! to the claim, and enforces the class's reclaim policy when either side
//! goes away.
//!
//! - [`resource`]: entity shapes, capability traits and the kind registry
//! - [`class`]: portable to non-portable class resolution
//! - [`binding`]: the binding phase machine, matcher and audit
//! - [`secret`]: connection secret propagation
//! - [`reclaim`]: reclaim policy enforcement
//! - [`reconcile`]: per-key reconcile passes and the controller loop
//! - [`store`]: the object store abstraction and its in-memory implementation

pub mod binding;
pub mod class;
pub mod condition;
pub mod config;
pub mod consts;
pub mod fixture;
pub mod meta;
pub mod reclaim;
pub mod reconcile;
pub mod resource;
pub mod retry;
pub mod secret;
pub mod store;
pub mod util;
