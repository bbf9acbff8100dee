//! Controller configuration.
//!
//! Defaults are overlaid with `CLAIMBIND_*` environment variables. Durations
//! use humantime syntax (`250ms`, `5s`). A variable that is set but does not
//! parse is an error rather than silently falling back to the default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{
  ENV_BACKOFF_BASE, ENV_BACKOFF_MAX, ENV_BIND_ATTEMPTS, ENV_MAX_ROUNDS, ENV_PARALLELISM, ENV_RESOURCE_WAIT,
};
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid value {value:?} for {var}: {reason}")]
  Invalid {
    var: &'static str,
    value: String,
    reason: String,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
  /// Maximum reconciles running at once.
  pub parallelism: usize,
  /// Retries for lost optimistic-concurrency races inside one bind.
  pub bind_retry: RetryPolicy,
  /// Per-key requeue backoff after a failed reconcile.
  pub backoff: RetryPolicy,
  /// Recheck interval while waiting on something external, such as a
  /// managed resource being provisioned.
  pub resource_wait: Duration,
  /// Upper bound on rounds in [`Controller::run_until_idle`].
  ///
  /// [`Controller::run_until_idle`]: crate::reconcile::Controller::run_until_idle
  pub max_rounds: usize,
}

impl Default for ControllerConfig {
  fn default() -> Self {
    Self {
      parallelism: 4,
      bind_retry: RetryPolicy {
        max_attempts: 8,
        ..RetryPolicy::default()
      },
      backoff: RetryPolicy {
        max_attempts: 6,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_secs(5),
        jitter: 0.2,
      },
      resource_wait: Duration::from_secs(5),
      max_rounds: 64,
    }
  }
}

impl ControllerConfig {
  /// Defaults overlaid with the environment.
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(n) = parse_var::<usize>(ENV_PARALLELISM)? {
      config.parallelism = positive(ENV_PARALLELISM, n)?;
    }
    if let Some(n) = parse_var::<u32>(ENV_BIND_ATTEMPTS)? {
      config.bind_retry.max_attempts = positive(ENV_BIND_ATTEMPTS, n)?;
    }
    if let Some(d) = duration_var(ENV_BACKOFF_BASE)? {
      config.backoff.base_delay = d;
    }
    if let Some(d) = duration_var(ENV_BACKOFF_MAX)? {
      config.backoff.max_delay = d;
    }
    if let Some(d) = duration_var(ENV_RESOURCE_WAIT)? {
      config.resource_wait = d;
    }
    if let Some(n) = parse_var::<usize>(ENV_MAX_ROUNDS)? {
      config.max_rounds = positive(ENV_MAX_ROUNDS, n)?;
    }

    if config.backoff.base_delay > config.backoff.max_delay {
      return Err(ConfigError::Invalid {
        var: ENV_BACKOFF_BASE,
        value: humantime::format_duration(config.backoff.base_delay).to_string(),
        reason: format!(
          "exceeds {ENV_BACKOFF_MAX} ({})",
          humantime::format_duration(config.backoff.max_delay)
        ),
      });
    }

    Ok(config)
  }
}

fn raw_var(var: &'static str) -> Option<String> {
  env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  raw_var(var)
    .map(|value| {
      value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: value.clone(),
        reason: e.to_string(),
      })
    })
    .transpose()
}

fn duration_var(var: &'static str) -> Result<Option<Duration>, ConfigError> {
  raw_var(var)
    .map(|value| {
      humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Invalid {
        var,
        value: value.clone(),
        reason: e.to_string(),
      })
    })
    .transpose()
}

fn positive<T: PartialEq + Default + ToString>(var: &'static str, n: T) -> Result<T, ConfigError> {
  if n == T::default() {
    return Err(ConfigError::Invalid {
      var,
      value: n.to_string(),
      reason: "must be at least 1".to_string(),
    });
  }
  Ok(n)
}
