use std::fmt;

use chrono::{DateTime, Utc};
use counter_workflow::HistoryEvent;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum InstanceStatus {
  Running,
  Completed,
  Failed,
  Terminated,
}

impl InstanceStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, InstanceStatus::Running)
  }
}

impl fmt::Display for InstanceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      InstanceStatus::Running => "running",
      InstanceStatus::Completed => "completed",
      InstanceStatus::Failed => "failed",
      InstanceStatus::Terminated => "terminated",
    })
  }
}

/// A workflow instance as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowInstance {
  pub instance_id: String,
  pub status: InstanceStatus,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
  /// A new running instance.
  pub fn new(instance_id: impl Into<String>, at: DateTime<Utc>) -> Self {
    Self {
      instance_id: instance_id.into(),
      status: InstanceStatus::Running,
      last_error: None,
      created_at: at,
      updated_at: at,
    }
  }
}

/// A committed history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
  pub position: u64,
  pub event: HistoryEvent,
  pub recorded_at: DateTime<Utc>,
}
