use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrderError;
use crate::place::{ItemDetails, OrderSource, PlaceOrder, Station};

/// Status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  Added,
  BaristaUpdated,
  KitchenUpdated,
  Notified,
  Failed,
}

impl OrderStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, OrderStatus::Notified | OrderStatus::Failed)
  }

  /// The status that follows this one on the success path.
  pub fn next(self) -> Option<OrderStatus> {
    match self {
      OrderStatus::Added => Some(OrderStatus::BaristaUpdated),
      OrderStatus::BaristaUpdated => Some(OrderStatus::KitchenUpdated),
      OrderStatus::KitchenUpdated => Some(OrderStatus::Notified),
      OrderStatus::Notified | OrderStatus::Failed => None,
    }
  }

  fn rank(self) -> Option<u8> {
    match self {
      OrderStatus::Added => Some(0),
      OrderStatus::BaristaUpdated => Some(1),
      OrderStatus::KitchenUpdated => Some(2),
      OrderStatus::Notified => Some(3),
      OrderStatus::Failed => None,
    }
  }

  /// Whether `self` is `target` or a later status on the success path.
  pub fn has_reached(self, target: OrderStatus) -> bool {
    match (self.rank(), target.rank()) {
      (Some(current), Some(target)) => current >= target,
      (None, None) => true,
      _ => false,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      OrderStatus::Added => "added",
      OrderStatus::BaristaUpdated => "barista_updated",
      OrderStatus::KitchenUpdated => "kitchen_updated",
      OrderStatus::Notified => "notified",
      OrderStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Preparation status of a single line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
  Placed,
  Fulfilled,
}

/// A line item. Item id, quantity and price never change once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
  pub item_id: String,
  pub name: String,
  pub quantity: u32,
  pub unit_price_cents: u32,
  pub station: Station,
  pub status: ItemStatus,
}

impl LineItem {
  pub fn new(details: &ItemDetails, quantity: u32) -> Self {
    Self {
      item_id: details.id.clone(),
      name: details.name.clone(),
      quantity,
      unit_price_cents: details.price_cents,
      station: details.station,
      status: ItemStatus::Placed,
    }
  }
}

/// Timestamp of a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
  pub status: OrderStatus,
  pub at: DateTime<Utc>,
}

/// Aggregate root for one customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  pub id: Uuid,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub customer_id: Option<String>,
  pub order_source: OrderSource,
  pub line_items: Vec<LineItem>,
  pub status: OrderStatus,
  pub transitions: Vec<StatusTransition>,
}

impl Order {
  /// Deterministic order id for a workflow instance.
  ///
  /// The id is a v5 UUID of the instance id, so re-running `AddOrder` for the
  /// same instance always targets the same order.
  pub fn id_for_instance(instance_id: &str) -> Uuid {
    Uuid::new_v5(
      &Uuid::NAMESPACE_OID,
      format!("counter-order:{instance_id}").as_bytes(),
    )
  }

  /// Create a freshly added order.
  pub fn new(id: Uuid, place: &PlaceOrder, line_items: Vec<LineItem>, at: DateTime<Utc>) -> Self {
    Self {
      id,
      customer_id: place.customer_id.clone(),
      order_source: place.order_source,
      line_items,
      status: OrderStatus::Added,
      transitions: vec![StatusTransition {
        status: OrderStatus::Added,
        at,
      }],
    }
  }

  /// Move to `to`.
  ///
  /// Returns `Ok(false)` when the order is already in `to`. `Failed` is
  /// reachable from any non-terminal status; every other target must be the
  /// direct successor of the current status.
  pub fn advance(&mut self, to: OrderStatus, at: DateTime<Utc>) -> Result<bool, OrderError> {
    if self.status == to {
      return Ok(false);
    }

    let allowed = match to {
      OrderStatus::Failed => !self.status.is_terminal(),
      _ => self.status.next() == Some(to),
    };

    if !allowed {
      return Err(OrderError::InvalidTransition {
        from: self.status,
        to,
      });
    }

    self.status = to;
    self.transitions.push(StatusTransition { status: to, at });
    Ok(true)
  }

  /// Mark all line items of a station as fulfilled.
  pub fn fulfill_station(&mut self, station: Station) -> usize {
    let mut fulfilled = 0;
    for item in self.line_items.iter_mut().filter(|i| i.station == station) {
      if item.status != ItemStatus::Fulfilled {
        item.status = ItemStatus::Fulfilled;
        fulfilled += 1;
      }
    }
    fulfilled
  }

  pub fn items_for(&self, station: Station) -> impl Iterator<Item = &LineItem> {
    self.line_items.iter().filter(move |i| i.station == station)
  }

  pub fn total_cents(&self) -> u64 {
    self
      .line_items
      .iter()
      .map(|i| u64::from(i.unit_price_cents) * u64::from(i.quantity))
      .sum()
  }

  /// When the order was added.
  pub fn created_at(&self) -> Option<DateTime<Utc>> {
    self.transitions.first().map(|t| t.at)
  }

  /// When the order entered the given status, if it did.
  pub fn transitioned_at(&self, status: OrderStatus) -> Option<DateTime<Utc>> {
    self
      .transitions
      .iter()
      .find(|t| t.status == status)
      .map(|t| t.at)
  }
}
