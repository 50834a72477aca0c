//! Counter Order
//!
//! The order aggregate fulfilled by the workflow engine. An [`Order`] is
//! created by the `AddOrder` activity and then moves through a fixed status
//! sequence, one step per activity:
//!
//! ```text
//! added -> barista_updated -> kitchen_updated -> notified
//!   \____________\_________________\______________-> failed
//! ```
//!
//! Transitions are monotonic. Skipping or regressing a status is rejected
//! with [`OrderError::InvalidTransition`].

mod error;
mod order;
mod place;

pub use error::OrderError;
pub use order::{ItemStatus, LineItem, Order, OrderStatus, StatusTransition};
pub use place::{ItemDetails, OrderItemRequest, OrderSource, PlaceOrder, Station};
