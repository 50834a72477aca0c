use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// Station that prepares a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Station {
  Barista,
  Kitchen,
}

/// Where the order was placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
  #[default]
  Counter,
  Web,
}

/// One requested item in a place-order payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRequest {
  pub id: String,
  pub qty: u32,
}

/// Payload that starts an order-fulfillment workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrder {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub customer_id: Option<String>,
  #[serde(default)]
  pub order_source: OrderSource,
  pub items: Vec<OrderItemRequest>,
}

impl PlaceOrder {
  pub fn validate(&self) -> Result<(), OrderError> {
    if self.items.is_empty() {
      return Err(OrderError::EmptyOrder);
    }

    if let Some(item) = self.items.iter().find(|i| i.qty == 0) {
      return Err(OrderError::InvalidQuantity {
        item_id: item.id.clone(),
        qty: item.qty,
      });
    }

    Ok(())
  }
}

/// Catalog data for an item, as returned by the product service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetails {
  pub id: String,
  pub name: String,
  pub station: Station,
  pub price_cents: u32,
}
