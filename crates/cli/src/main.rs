mod cmd;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{ReconcileArgs, cmd_check, cmd_reconcile};
use crate::output::{OutputFormat, print_error};

/// claimbind - binds resource claims to managed resources
#[derive(Parser)]
#[command(name = "claimbind")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Load a fixture, reconcile it until idle, and report the result
  Reconcile {
    /// Path to a YAML or JSON fixture
    fixture: PathBuf,

    /// Maximum concurrent reconciles (overrides CLAIMBIND_PARALLELISM)
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,

    /// Round limit before giving up (overrides CLAIMBIND_MAX_ROUNDS)
    #[arg(long)]
    max_rounds: Option<usize>,
  },

  /// Audit the bindings recorded in a fixture without reconciling it
  Check {
    /// Path to a YAML or JSON fixture
    fixture: PathBuf,
  },
}

fn main() {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Reconcile {
      fixture,
      parallelism,
      max_rounds,
    } => cmd_reconcile(&ReconcileArgs {
      fixture,
      parallelism,
      max_rounds,
      output: cli.output,
    }),
    Commands::Check { fixture } => cmd_check(&fixture, cli.output),
  };

  if let Err(e) = result {
    print_error(&format!("{e:#}"));
    std::process::exit(1);
  }
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "claimbind_lib=debug,claimbind=debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
