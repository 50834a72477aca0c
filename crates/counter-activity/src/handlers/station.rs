use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use counter_order::{OrderStatus, Station};
use counter_store::OrderRepository;
use tracing::info;

use super::{OrderRef, parse_input, to_output};
use crate::error::ActivityError;
use crate::registry::{ActivityContext, ActivityHandler};

/// Fulfills one station's line items and advances the order to `target`.
///
/// A call against an order that already reached `target` returns the order
/// unchanged.
pub struct StationUpdateHandler {
  orders: Arc<dyn OrderRepository>,
  station: Station,
  target: OrderStatus,
}

impl StationUpdateHandler {
  pub fn new(orders: Arc<dyn OrderRepository>, station: Station, target: OrderStatus) -> Self {
    Self {
      orders,
      station,
      target,
    }
  }
}

#[async_trait]
impl ActivityHandler for StationUpdateHandler {
  async fn handle(
    &self,
    ctx: &ActivityContext,
    input: serde_json::Value,
  ) -> Result<serde_json::Value, ActivityError> {
    let OrderRef { order_id } = parse_input(input)?;
    let mut order = self.orders.find_by_id(order_id).await?;

    if order.status.has_reached(self.target) {
      return to_output(&order);
    }

    let fulfilled = order.fulfill_station(self.station);
    order
      .advance(self.target, Utc::now())
      .map_err(ActivityError::permanent)?;
    let saved = self.orders.save(&order).await?;

    info!(
      instance_id = %ctx.instance_id,
      order_id = %saved.id,
      station = ?self.station,
      fulfilled,
      status = %saved.status,
      "station updated"
    );
    to_output(&saved)
  }
}
