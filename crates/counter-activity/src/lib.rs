//! Activity execution for counter workflows.
//!
//! An activity is a discrete operation with real side effects, invoked by the
//! workflow engine and retried independently of it. This crate provides:
//!
//! - [`ActivityHandler`]: the trait every activity implements
//! - [`ActivityRegistry`]: binds a handler to every [`ActivityKind`], failing
//!   at build time when one is missing
//! - [`ActivityExecutor`]: runs one activity call with the retry policy,
//!   timeout budget and failure classification
//! - the four order-fulfillment handlers and the collaborators they call
//!   (catalog gateway, notifier, order repository)
//!
//! Handlers may be invoked more than once for the same call. Each handler is
//! idempotent with respect to its input.
//!
//! [`ActivityKind`]: counter_workflow::ActivityKind

mod error;
mod executor;
mod gateway;
mod handlers;
mod notifier;
mod registry;

pub use error::{ActivityError, ExecutionError, RegistryError};
pub use executor::{ActivityExecutor, ActivityOutput};
pub use gateway::{CatalogGateway, GatewayError, HttpCatalogGateway, StaticCatalog};
pub use handlers::{
  AddOrderHandler, AddOrderInput, NotifyHandler, NotifyInput, OrderRef, StationUpdateHandler,
  fulfillment_registry,
};
pub use notifier::{LogNotifier, NotifyError, Notifier, WebhookNotifier};
pub use registry::{ActivityContext, ActivityHandler, ActivityRegistry, ActivityRegistryBuilder};
