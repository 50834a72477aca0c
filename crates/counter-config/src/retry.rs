use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay between activity attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  Constant,
  Linear,
  Exponential,
}

/// Retry policy applied to transient activity failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total number of attempts, including the first one. Values below 1 are treated as 1.
  pub max_attempts: u32,
  pub initial_delay_ms: u64,
  /// Upper bound for a single backoff delay.
  pub max_delay_ms: u64,
  pub backoff: RetryBackoff,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay_ms: 100,
      max_delay_ms: 5_000,
      backoff: RetryBackoff::Exponential,
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn no_retry() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts.max(1)
  }

  /// Delay to wait after the given failed attempt (1-based) before the next one.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let base = self.initial_delay_ms;
    let millis = match self.backoff {
      RetryBackoff::Constant => base,
      RetryBackoff::Linear => base.saturating_mul(u64::from(attempt)),
      RetryBackoff::Exponential => {
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        base.saturating_mul(factor)
      }
    };
    Duration::from_millis(millis.min(self.max_delay_ms))
  }
}
