//! Integration tests for claimbind-lib.
//!
//! Each file drives the public API end to end against the in-memory stores.

mod common;

mod binding_tests;
mod concurrency_tests;
mod reclaim_tests;
mod secret_tests;
