//! Counter Store
//!
//! This crate provides the storage traits and implementations behind the
//! workflow engine:
//!
//! - [`HistoryStore`]: workflow instances and their append-only history.
//!   Appends are atomic and totally ordered per instance; committed events
//!   are never reordered or removed.
//! - [`OrderRepository`]: the order aggregate, used by activity handlers.
//!
//! Two implementations are provided: [`MemoryStore`] for tests and
//! ephemeral runs, and [`SqliteStore`] which persists to SQLite.

mod memory;
mod sqlite;
mod types;

pub use memory::{MemoryOrderRepository, MemoryStore};
pub use sqlite::SqliteStore;
pub use types::{HistoryRecord, InstanceStatus, WorkflowInstance};

use async_trait::async_trait;
use counter_order::Order;
use counter_workflow::HistoryEvent;
use uuid::Uuid;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same key already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A stored value could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A committed history event could not be decoded.
  #[error("corrupt history at position {position}: {reason}")]
  Corrupt { position: u64, reason: String },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Running migrations failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),
}

/// Storage for workflow instances and their history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
  /// Create an instance whose history starts with `first_event` at position 0.
  ///
  /// Fails with [`Error::AlreadyExists`] if the instance id is taken.
  async fn create_instance(
    &self,
    instance: &WorkflowInstance,
    first_event: &HistoryEvent,
  ) -> Result<(), Error>;

  /// Get an instance by ID.
  async fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance, Error>;

  /// List instances, optionally filtered by status.
  async fn list_instances(
    &self,
    status: Option<InstanceStatus>,
  ) -> Result<Vec<WorkflowInstance>, Error>;

  /// Update the status of an instance.
  async fn update_instance_status(
    &self,
    instance_id: &str,
    status: InstanceStatus,
    last_error: Option<&str>,
  ) -> Result<(), Error>;

  /// Append an event and return its committed position.
  async fn append(&self, instance_id: &str, event: &HistoryEvent) -> Result<u64, Error>;

  /// Read the history of an instance starting at `position`, in order.
  ///
  /// Fails with [`Error::Corrupt`] if a stored event cannot be decoded.
  async fn read_from(
    &self,
    instance_id: &str,
    position: u64,
  ) -> Result<Vec<HistoryRecord>, Error>;
}

/// Storage for orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
  /// Insert or replace an order, returning what was committed.
  async fn save(&self, order: &Order) -> Result<Order, Error>;

  /// Get an order by ID.
  async fn find_by_id(&self, order_id: Uuid) -> Result<Order, Error>;

  /// All orders, oldest first.
  async fn list(&self) -> Result<Vec<Order>, Error>;
}
