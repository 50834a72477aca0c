use std::fmt;

use serde::{Deserialize, Serialize};

use crate::activity::ActivityKind;

/// Why an activity did not produce an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  /// The handler reported a permanent (business/validation) failure.
  Failed,
  /// Transient failures persisted past the retry budget.
  Exhausted,
  /// No handler is bound for the activity.
  UnknownActivity,
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      FailureKind::Failed => "failed",
      FailureKind::Exhausted => "exhausted",
      FailureKind::UnknownActivity => "unknown_activity",
    })
  }
}

/// Recorded failure of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFailure {
  pub kind: FailureKind,
  pub message: String,
  pub attempts: u32,
}

impl fmt::Display for ActivityFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} after {} attempt(s): {}",
      self.kind, self.attempts, self.message
    )
  }
}

/// One entry in a workflow instance's history.
///
/// `seq` is the scheduling position of an activity call: the Nth call made
/// by the workflow definition has `seq == N` (0-based). Completion events
/// refer back to the call by the same `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
  /// The instance was created with the given input.
  WorkflowStarted { input: serde_json::Value },

  /// The workflow decided to call an activity.
  ActivityScheduled {
    seq: u64,
    activity: ActivityKind,
    input: serde_json::Value,
  },

  /// An activity call returned an output.
  ActivityCompleted {
    seq: u64,
    output: serde_json::Value,
    attempts: u32,
  },

  /// An activity call failed permanently or ran out of attempts.
  ActivityFailed { seq: u64, failure: ActivityFailure },

  /// An out-of-band signal was raised against the instance.
  EventRaised {
    name: String,
    data: serde_json::Value,
  },

  /// The workflow finished successfully.
  WorkflowCompleted { output: serde_json::Value },

  /// The workflow finished unsuccessfully.
  WorkflowFailed { error: String },

  /// The instance was terminated from outside.
  WorkflowTerminated { reason: String },
}

impl HistoryEvent {
  /// Short event name, used in logs.
  pub fn name(&self) -> &'static str {
    match self {
      HistoryEvent::WorkflowStarted { .. } => "workflow_started",
      HistoryEvent::ActivityScheduled { .. } => "activity_scheduled",
      HistoryEvent::ActivityCompleted { .. } => "activity_completed",
      HistoryEvent::ActivityFailed { .. } => "activity_failed",
      HistoryEvent::EventRaised { .. } => "event_raised",
      HistoryEvent::WorkflowCompleted { .. } => "workflow_completed",
      HistoryEvent::WorkflowFailed { .. } => "workflow_failed",
      HistoryEvent::WorkflowTerminated { .. } => "workflow_terminated",
    }
  }

  /// Whether the event ends the instance.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      HistoryEvent::WorkflowCompleted { .. }
        | HistoryEvent::WorkflowFailed { .. }
        | HistoryEvent::WorkflowTerminated { .. }
    )
  }

  /// The scheduling position an activity event refers to.
  pub fn seq(&self) -> Option<u64> {
    match self {
      HistoryEvent::ActivityScheduled { seq, .. }
      | HistoryEvent::ActivityCompleted { seq, .. }
      | HistoryEvent::ActivityFailed { seq, .. } => Some(*seq),
      _ => None,
    }
  }
}
