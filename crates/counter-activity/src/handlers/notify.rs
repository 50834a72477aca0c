use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use counter_order::OrderStatus;
use counter_store::OrderRepository;

use super::{NotifyInput, parse_input, to_output};
use crate::error::ActivityError;
use crate::notifier::Notifier;
use crate::registry::{ActivityContext, ActivityHandler};

/// Sends the customer notification, then marks the order notified.
///
/// An order that is already notified is not notified again.
pub struct NotifyHandler {
  orders: Arc<dyn OrderRepository>,
  notifier: Arc<dyn Notifier>,
}

impl NotifyHandler {
  pub fn new(orders: Arc<dyn OrderRepository>, notifier: Arc<dyn Notifier>) -> Self {
    Self { orders, notifier }
  }
}

#[async_trait]
impl ActivityHandler for NotifyHandler {
  async fn handle(
    &self,
    _ctx: &ActivityContext,
    input: serde_json::Value,
  ) -> Result<serde_json::Value, ActivityError> {
    let NotifyInput { order_id, message } = parse_input(input)?;
    let mut order = self.orders.find_by_id(order_id).await?;

    if order.status.has_reached(OrderStatus::Notified) {
      return to_output(&order);
    }

    self
      .notifier
      .notify(order_id, &message)
      .await
      .map_err(ActivityError::transient)?;

    order
      .advance(OrderStatus::Notified, Utc::now())
      .map_err(ActivityError::permanent)?;
    let saved = self.orders.save(&order).await?;
    to_output(&saved)
  }
}
