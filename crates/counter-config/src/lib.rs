//! Counter Config
//!
//! This crate contains the serializable configuration for the order-fulfillment
//! engine. Every field has a default, so an empty JSON object is a valid config.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `--config=counter.json`)
//! - Defaults, overridden field by field from CLI flags and environment
//!
//! ```json
//! {
//!   "retry": { "max_attempts": 5, "initial_delay_ms": 50, "backoff": "exponential" },
//!   "activity_timeout_ms": 2000,
//!   "catalog_url": "http://localhost:5001"
//! }
//! ```

mod config;
mod retry;

pub use config::{ConfigError, CounterConfig};
pub use retry::{RetryBackoff, RetryPolicy};
