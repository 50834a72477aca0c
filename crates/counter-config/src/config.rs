use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}': {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file '{path}': {source}")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
  pub retry: RetryPolicy,
  /// Maximum duration of a single activity attempt.
  pub activity_timeout_ms: u64,
  /// Delay before a decision cycle is retried after a history append failed.
  pub cycle_retry_delay_ms: u64,
  /// Base URL of the product catalog service. The built-in menu is used when unset.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub catalog_url: Option<String>,
  /// Webhook receiving customer notifications. Notifications are only logged when unset.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notify_url: Option<String>,
}

impl Default for CounterConfig {
  fn default() -> Self {
    Self {
      retry: RetryPolicy::default(),
      activity_timeout_ms: 10_000,
      cycle_retry_delay_ms: 500,
      catalog_url: None,
      notify_url: None,
    }
  }
}

impl CounterConfig {
  /// Load a config from a JSON file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.display().to_string(),
      source,
    })
  }

  pub fn activity_timeout(&self) -> Duration {
    Duration::from_millis(self.activity_timeout_ms)
  }

  pub fn cycle_retry_delay(&self) -> Duration {
    Duration::from_millis(self.cycle_retry_delay_ms)
  }
}
