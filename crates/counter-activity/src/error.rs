//! Activity errors.

use counter_workflow::{ActivityFailure, ActivityKind, FailureKind};

/// Failure reported by an activity handler.
///
/// The handler classifies its own failures: transient ones are retried by
/// the executor, permanent ones are surfaced immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivityError {
  /// Network/timeout-like failure; retrying may succeed.
  #[error("transient: {0}")]
  Transient(String),

  /// Validation or business-rule failure; retrying will not help.
  #[error("permanent: {0}")]
  Permanent(String),
}

impl ActivityError {
  pub fn transient(message: impl ToString) -> Self {
    Self::Transient(message.to_string())
  }

  pub fn permanent(message: impl ToString) -> Self {
    Self::Permanent(message.to_string())
  }
}

impl From<counter_store::Error> for ActivityError {
  fn from(err: counter_store::Error) -> Self {
    match err {
      counter_store::Error::Database(_) => ActivityError::transient(err),
      _ => ActivityError::permanent(err),
    }
  }
}

/// Errors surfaced by [`ActivityExecutor::execute`](crate::ActivityExecutor::execute).
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
  /// No handler is bound for the activity.
  #[error("unknown activity: {0}")]
  UnknownActivity(ActivityKind),

  /// The handler failed permanently.
  #[error("activity '{activity}' failed: {message}")]
  ActivityFailed {
    activity: ActivityKind,
    message: String,
    attempts: u32,
  },

  /// Transient failures persisted for every allowed attempt.
  #[error("activity '{activity}' exhausted {attempts} attempt(s): {message}")]
  ActivityExhausted {
    activity: ActivityKind,
    message: String,
    attempts: u32,
  },

  /// Execution was cancelled before an outcome was reached.
  #[error("activity cancelled")]
  Cancelled,
}

impl ExecutionError {
  /// The failure to record in history, or `None` for cancellation, which
  /// leaves the call without an outcome.
  pub fn to_failure(&self) -> Option<ActivityFailure> {
    match self {
      ExecutionError::UnknownActivity(activity) => Some(ActivityFailure {
        kind: FailureKind::UnknownActivity,
        message: format!("no handler bound for {activity}"),
        attempts: 0,
      }),
      ExecutionError::ActivityFailed {
        message, attempts, ..
      } => Some(ActivityFailure {
        kind: FailureKind::Failed,
        message: message.clone(),
        attempts: *attempts,
      }),
      ExecutionError::ActivityExhausted {
        message, attempts, ..
      } => Some(ActivityFailure {
        kind: FailureKind::Exhausted,
        message: message.clone(),
        attempts: *attempts,
      }),
      ExecutionError::Cancelled => None,
    }
  }
}

/// Errors building an [`ActivityRegistry`](crate::ActivityRegistry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
  #[error("no handler bound for activities: {}", format_kinds(.0))]
  Unbound(Vec<ActivityKind>),
}

fn format_kinds(kinds: &[ActivityKind]) -> String {
  kinds
    .iter()
    .map(|k| k.name())
    .collect::<Vec<_>>()
    .join(", ")
}
