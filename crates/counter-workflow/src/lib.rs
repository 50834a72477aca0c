//! Counter Workflow
//!
//! This crate provides the vocabulary persisted in a workflow instance's
//! append-only history. It carries no behavior beyond (de)serialization so
//! that the store, the activity executor and the replay engine all agree on
//! one format.
//!
//! Key types:
//! - [`ActivityKind`] - the closed set of activities a workflow may schedule
//! - [`HistoryEvent`] - one entry in an instance's history
//! - [`ActivityFailure`] - the recorded outcome of an activity that did not succeed

mod activity;
mod event;

pub use activity::ActivityKind;
pub use event::{ActivityFailure, FailureKind, HistoryEvent};
