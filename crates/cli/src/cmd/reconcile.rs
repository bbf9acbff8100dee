//! Implementation of the `claimbind reconcile` command.
//!
//! Loads a fixture into in-memory stores, runs the controller until it goes
//! idle, and reports where every claim and managed resource ended up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use claimbind_lib::binding::audit_bindings;
use claimbind_lib::config::ControllerConfig;
use claimbind_lib::fixture::Fixture;
use claimbind_lib::reclaim::RecordingProvisioner;
use claimbind_lib::reconcile::{Controller, Reconciler, RunStats};
use claimbind_lib::secret::{MemorySecretStore, SecretStore};
use claimbind_lib::store::{MemoryStore, ObjectStore};

use super::report::BindingReport;
use crate::output::{OutputFormat, format_duration, print_info, print_json, print_stat, print_warning};

pub struct ReconcileArgs {
  pub fixture: PathBuf,
  pub parallelism: Option<usize>,
  pub max_rounds: Option<usize>,
  pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileOutput {
  stats: RunStats,
  #[serde(flatten)]
  report: BindingReport,
  secrets: Vec<String>,
  deprovisioned: Vec<String>,
}

/// Execute the reconcile command.
///
/// Fails when the run did not settle within the round limit or when the
/// final state has binding violations.
pub fn cmd_reconcile(args: &ReconcileArgs) -> Result<()> {
  let mut config = ControllerConfig::from_env().context("Invalid controller configuration")?;
  if let Some(parallelism) = args.parallelism {
    config.parallelism = parallelism.max(1);
  }
  if let Some(max_rounds) = args.max_rounds {
    config.max_rounds = max_rounds;
  }

  let fixture = Fixture::load(&args.fixture)
    .with_context(|| format!("Failed to load fixture {}", args.fixture.display()))?;

  let store = Arc::new(MemoryStore::new());
  let secrets = Arc::new(MemorySecretStore::new());
  let provisioner = Arc::new(RecordingProvisioner::new());

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let (stats, secret_keys) = rt.block_on(async {
    let registry = Arc::new(fixture.apply(&*store, &*secrets).await.context("Failed to apply fixture")?);
    let objects: Arc<dyn ObjectStore> = store.clone();
    let reconciler = Reconciler::new(
      objects.clone(),
      secrets.clone(),
      provisioner.clone(),
      registry.clone(),
      &config,
    );
    let controller = Controller::new(Arc::new(reconciler), objects, registry, config.clone());
    let stats = controller.run_until_idle().await.context("Reconcile failed")?;
    let secret_keys: Vec<String> = secrets
      .list()
      .await
      .context("Failed to list secrets")?
      .into_iter()
      .map(|(key, _)| key.to_string())
      .collect();
    anyhow::Ok((stats, secret_keys))
  })?;
  info!(elapsed = ?started.elapsed(), "reconcile finished");

  let snapshot = store.snapshot();
  let report = BindingReport::new(&snapshot, audit_bindings(&snapshot));
  let consistent = report.is_consistent();
  let settled = stats.idle;
  let output = ReconcileOutput {
    stats,
    report,
    secrets: secret_keys,
    deprovisioned: provisioner.deprovisioned().iter().map(ToString::to_string).collect(),
  };

  if args.output.is_json() {
    print_json(&output)?;
  } else {
    print_text(&output, started.elapsed());
  }

  if !settled {
    bail!("controller did not settle within {} rounds", config.max_rounds);
  }
  if !consistent {
    bail!("{} binding violation(s) found", output.report.violations.len());
  }
  Ok(())
}

fn print_text(output: &ReconcileOutput, elapsed: std::time::Duration) {
  let stats = &output.stats;
  print_info(&format!("Reconciled in {}", format_duration(elapsed)));
  print_stat("Rounds", &stats.rounds.to_string());
  print_stat("Reconciles", &stats.reconciles.to_string());
  print_stat("Failures", &stats.failures.to_string());
  if stats.waiting > 0 {
    print_stat("Waiting", &stats.waiting.to_string());
  }
  if stats.abandoned > 0 {
    print_warning(&format!("{} key(s) gave up after repeated failures", stats.abandoned));
  }

  output.report.print();

  if !output.secrets.is_empty() {
    println!();
    println!("Secrets:");
    for key in &output.secrets {
      println!("  {}", key);
    }
  }
  if !output.deprovisioned.is_empty() {
    println!();
    println!("Deprovisioned:");
    for key in &output.deprovisioned {
      println!("  {}", key);
    }
  }
}
