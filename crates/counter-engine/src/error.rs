use counter_store::InstanceStatus;

/// Errors produced while replaying a history.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
  /// The workflow definition requested something other than what the
  /// history recorded at the same position.
  #[error(
    "non-determinism detected at position {position}: history recorded {recorded}, workflow requested {requested}"
  )]
  NonDeterminismDetected {
    position: u64,
    recorded: String,
    requested: String,
  },

  /// The history violates the event ordering rules.
  #[error("corrupt history at position {position}: {reason}")]
  CorruptHistory { position: u64, reason: String },
}

/// Errors returned by the [`Coordinator`](crate::Coordinator).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("instance '{instance_id}' already exists ({status})")]
  InstanceAlreadyExists {
    instance_id: String,
    status: InstanceStatus,
  },

  #[error("instance not found: {0}")]
  NotFound(String),

  #[error("instance '{instance_id}' is already {status}")]
  InstanceTerminal {
    instance_id: String,
    status: InstanceStatus,
  },

  #[error(transparent)]
  Replay(#[from] ReplayError),

  #[error("store error: {0}")]
  Store(#[from] counter_store::Error),

  #[error("invalid workflow input: {0}")]
  Input(#[from] serde_json::Error),

  #[error("coordinator is shutting down")]
  ShuttingDown,
}

impl EngineError {
  /// Map a store lookup error, turning `NotFound` into an instance error.
  pub(crate) fn lookup(instance_id: &str, err: counter_store::Error) -> Self {
    match err {
      counter_store::Error::NotFound(_) => EngineError::NotFound(instance_id.to_string()),
      other => EngineError::Store(other),
    }
  }
}
