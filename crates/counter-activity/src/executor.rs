//! Activity executor implementation.

use std::sync::Arc;
use std::time::Duration;

use counter_config::{CounterConfig, RetryPolicy};
use counter_workflow::ActivityKind;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::{ActivityError, ExecutionError};
use crate::registry::{ActivityContext, ActivityRegistry};

/// Successful outcome of an activity call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOutput {
  pub output: serde_json::Value,
  /// Number of handler invocations it took, including the successful one.
  pub attempts: u32,
}

/// Executes activity calls against the registry.
///
/// Each attempt runs under the configured timeout; exceeding it counts as a
/// transient failure. Transient failures are retried with the policy's
/// backoff until `max_attempts` is reached. Permanent failures are returned
/// immediately.
pub struct ActivityExecutor {
  registry: Arc<ActivityRegistry>,
  policy: RetryPolicy,
  timeout: Duration,
}

impl ActivityExecutor {
  pub fn new(registry: ActivityRegistry, policy: RetryPolicy, timeout: Duration) -> Self {
    Self {
      registry: Arc::new(registry),
      policy,
      timeout,
    }
  }

  pub fn from_config(registry: ActivityRegistry, config: &CounterConfig) -> Self {
    Self::new(registry, config.retry.clone(), config.activity_timeout())
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Execute one activity call.
  #[instrument(
    name = "activity_execute",
    skip(self, input, cancel),
    fields(
      instance_id = %instance_id,
      activity = %activity,
      seq = seq,
    )
  )]
  pub async fn execute(
    &self,
    instance_id: &str,
    seq: u64,
    activity: ActivityKind,
    input: serde_json::Value,
    cancel: CancellationToken,
  ) -> Result<ActivityOutput, ExecutionError> {
    let Some(handler) = self.registry.get(activity) else {
      error!("no handler bound for activity");
      return Err(ExecutionError::UnknownActivity(activity));
    };

    let max_attempts = self.policy.max_attempts();
    let mut attempt = 0;

    loop {
      attempt += 1;
      if cancel.is_cancelled() {
        return Err(ExecutionError::Cancelled);
      }

      let ctx = ActivityContext {
        instance_id: instance_id.to_string(),
        seq,
        attempt,
      };

      let outcome = tokio::select! {
        outcome = tokio::time::timeout(self.timeout, handler.handle(&ctx, input.clone())) => outcome,
        _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
      };

      let err = match outcome {
        Ok(Ok(output)) => {
          info!(attempts = attempt, "activity succeeded");
          return Ok(ActivityOutput {
            output,
            attempts: attempt,
          });
        }
        Ok(Err(err)) => err,
        Err(_) => ActivityError::Transient(format!("timed out after {:?}", self.timeout)),
      };

      match err {
        ActivityError::Permanent(message) => {
          warn!(attempt, error = %message, "activity failed permanently");
          return Err(ExecutionError::ActivityFailed {
            activity,
            message,
            attempts: attempt,
          });
        }
        ActivityError::Transient(message) if attempt >= max_attempts => {
          warn!(attempt, error = %message, "activity retries exhausted");
          return Err(ExecutionError::ActivityExhausted {
            activity,
            message,
            attempts: attempt,
          });
        }
        ActivityError::Transient(message) => {
          let delay = self.policy.delay_after(attempt);
          warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "transient activity failure, retrying"
          );

          tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
          }
        }
      }
    }
  }
}
