//! Implementation of the `claimbind check` command.
//!
//! Loads a fixture into an in-memory store exactly as written and audits the
//! bindings it records. Nothing is reconciled.

use std::path::Path;

use anyhow::{Context, Result, bail};

use claimbind_lib::binding::audit_bindings;
use claimbind_lib::fixture::Fixture;
use claimbind_lib::secret::MemorySecretStore;
use claimbind_lib::store::MemoryStore;

use super::report::BindingReport;
use crate::output::{OutputFormat, print_json};

pub fn cmd_check(fixture: &Path, output: OutputFormat) -> Result<()> {
  let fixture = Fixture::load(fixture).with_context(|| format!("Failed to load fixture {}", fixture.display()))?;

  let store = MemoryStore::new();
  let secrets = MemorySecretStore::new();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(fixture.apply(&store, &secrets))
    .context("Failed to apply fixture")?;

  let snapshot = store.snapshot();
  let report = BindingReport::new(&snapshot, audit_bindings(&snapshot));

  if output.is_json() {
    print_json(&report)?;
  } else {
    report.print();
  }

  if !report.is_consistent() {
    bail!("{} binding violation(s) found", report.violations.len());
  }
  Ok(())
}
