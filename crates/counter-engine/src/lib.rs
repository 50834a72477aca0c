//! Counter Engine
//!
//! This crate drives order-fulfillment workflows durably: every decision and
//! activity outcome is appended to the instance's history, and the workflow's
//! state is rebuilt by replaying that history, so a restart neither loses
//! progress nor repeats completed activities.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Coordinator                          │
//! │  - start / raise_event / terminate / get_status / wait      │
//! │  - recover re-attaches running instances after a restart    │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ mpsc (one mailbox per instance)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      InstanceWorker                         │
//! │  - one decision cycle at a time                             │
//! │  - load history → replay → append decisions → dispatch      │
//! └─────────────────────────────────────────────────────────────┘
//!               │                                │
//!               ▼                                ▼
//! ┌───────────────────────────┐    ┌───────────────────────────┐
//! │          replay           │    │     ActivityExecutor      │
//! │  - WorkflowDefinition     │    │  - retry, backoff,        │
//! │    decides, history       │    │    timeout per attempt    │
//! │    must agree             │    │  - outcome sent back to   │
//! └───────────────────────────┘    │    the worker             │
//!                                  └───────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let registry = fulfillment_registry(orders.clone(), catalog, notifier)?;
//! let executor = ActivityExecutor::from_config(registry, &config);
//! let coordinator = Coordinator::new(store, orders, executor, &config);
//!
//! coordinator.start("ord-1", place_order).await?;
//! let status = coordinator.wait("ord-1").await?;
//! coordinator.shutdown().await;
//! ```

mod context;
mod coordinator;
mod error;
mod fulfillment;
mod replay;
mod status;
mod worker;

pub use context::{Instruction, Signal, Step, StepOutcome, WorkflowContext, WorkflowDefinition};
pub use coordinator::Coordinator;
pub use error::{EngineError, ReplayError};
pub use fulfillment::{FULFILLMENT_STEPS, FulfillmentStage, OrderFulfillment};
pub use replay::{NextAction, PendingCall, Replay, ReplayStatus, replay};
pub use status::WorkflowStatus;
