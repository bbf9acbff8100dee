mod check;
mod reconcile;
mod report;

pub use check::cmd_check;
pub use reconcile::{ReconcileArgs, cmd_reconcile};
