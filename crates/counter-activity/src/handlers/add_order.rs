use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use counter_order::{LineItem, Order};
use counter_store::{Error as StoreError, OrderRepository};
use tracing::{debug, info};

use super::{AddOrderInput, parse_input, to_output};
use crate::error::ActivityError;
use crate::gateway::{CatalogGateway, GatewayError};
use crate::registry::{ActivityContext, ActivityHandler};

/// Creates the order from the place-order payload.
///
/// If an order with the requested id already exists it is returned as is,
/// so a re-dispatched call does not create a second order.
pub struct AddOrderHandler {
  orders: Arc<dyn OrderRepository>,
  catalog: Arc<dyn CatalogGateway>,
}

impl AddOrderHandler {
  pub fn new(orders: Arc<dyn OrderRepository>, catalog: Arc<dyn CatalogGateway>) -> Self {
    Self { orders, catalog }
  }
}

#[async_trait]
impl ActivityHandler for AddOrderHandler {
  async fn handle(
    &self,
    ctx: &ActivityContext,
    input: serde_json::Value,
  ) -> Result<serde_json::Value, ActivityError> {
    let input: AddOrderInput = parse_input(input)?;
    input.order.validate().map_err(ActivityError::permanent)?;

    match self.orders.find_by_id(input.order_id).await {
      Ok(existing) => {
        debug!(order_id = %existing.id, "order already added");
        return to_output(&existing);
      }
      Err(StoreError::NotFound(_)) => {}
      Err(e) => return Err(e.into()),
    }

    let mut line_items = Vec::with_capacity(input.order.items.len());
    for requested in &input.order.items {
      let details = self
        .catalog
        .fetch_item(&requested.id)
        .await
        .map_err(|e| match e {
          GatewayError::NotFound(_) => ActivityError::permanent(e),
          GatewayError::Unavailable(_) => ActivityError::transient(e),
        })?;
      line_items.push(LineItem::new(&details, requested.qty));
    }

    let order = Order::new(input.order_id, &input.order, line_items, Utc::now());
    let saved = self.orders.save(&order).await?;

    info!(
      instance_id = %ctx.instance_id,
      order_id = %saved.id,
      items = saved.line_items.len(),
      total_cents = saved.total_cents(),
      "order added"
    );
    to_output(&saved)
  }
}
