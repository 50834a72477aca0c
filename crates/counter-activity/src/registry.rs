//! Binding of activity handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use counter_workflow::ActivityKind;

use crate::error::{ActivityError, RegistryError};

/// Identifies the call a handler invocation belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityContext {
  pub instance_id: String,
  /// Scheduling position of the call within the instance.
  pub seq: u64,
  /// 1-based attempt number.
  pub attempt: u32,
}

/// An activity implementation.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
  async fn handle(
    &self,
    ctx: &ActivityContext,
    input: serde_json::Value,
  ) -> Result<serde_json::Value, ActivityError>;
}

/// Lookup table from activity to handler.
#[derive(Clone)]
pub struct ActivityRegistry {
  handlers: HashMap<ActivityKind, Arc<dyn ActivityHandler>>,
}

impl ActivityRegistry {
  pub fn builder() -> ActivityRegistryBuilder {
    ActivityRegistryBuilder::default()
  }

  pub fn get(&self, kind: ActivityKind) -> Option<Arc<dyn ActivityHandler>> {
    self.handlers.get(&kind).cloned()
  }

  pub fn contains(&self, kind: ActivityKind) -> bool {
    self.handlers.contains_key(&kind)
  }
}

/// Builder for [`ActivityRegistry`].
#[derive(Default)]
pub struct ActivityRegistryBuilder {
  handlers: HashMap<ActivityKind, Arc<dyn ActivityHandler>>,
}

impl ActivityRegistryBuilder {
  /// Bind a handler, replacing any previous binding for the same activity.
  pub fn bind(mut self, kind: ActivityKind, handler: Arc<dyn ActivityHandler>) -> Self {
    self.handlers.insert(kind, handler);
    self
  }

  /// Build the registry, requiring a handler for every [`ActivityKind`].
  pub fn build(self) -> Result<ActivityRegistry, RegistryError> {
    let missing: Vec<ActivityKind> = ActivityKind::ALL
      .into_iter()
      .filter(|kind| !self.handlers.contains_key(kind))
      .collect();

    if !missing.is_empty() {
      return Err(RegistryError::Unbound(missing));
    }

    Ok(self.build_partial())
  }

  /// Build the registry without checking coverage. Calls to unbound
  /// activities fail at execution time with `UnknownActivity`.
  pub fn build_partial(self) -> ActivityRegistry {
    ActivityRegistry {
      handlers: self.handlers,
    }
  }
}
