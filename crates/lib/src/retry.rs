//! Bounded exponential backoff with jitter.
//!
//! Optimistic concurrency is the only lock in the system, so lost races are
//! retried explicitly: a bounded number of attempts, each delayed by an
//! exponentially growing, jittered interval.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
  /// Fraction of the delay randomized away, in `0.0..=1.0`.
  pub jitter: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay: Duration::from_millis(10),
      max_delay: Duration::from_secs(1),
      jitter: 0.5,
    }
  }
}

impl RetryPolicy {
  /// A policy that retries immediately. Useful in tests.
  pub fn immediate(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      base_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
      jitter: 0.0,
    }
  }

  /// Delay before retry number `attempt` (zero-based).
  ///
  /// The undelayed value is `base_delay * 2^attempt`, capped at `max_delay`;
  /// jitter then subtracts up to `jitter` of it.
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    let raw = self.base_delay.saturating_mul(factor).min(self.max_delay);

    let jitter = self.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || raw.is_zero() {
      return raw;
    }
    let cut = rand::thread_rng().gen_range(0.0..=jitter);
    raw.mul_f64(1.0 - cut)
  }

  pub fn should_retry(&self, attempt: u32) -> bool {
    attempt + 1 < self.max_attempts
  }
}
