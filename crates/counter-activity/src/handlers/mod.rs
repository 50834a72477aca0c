//! Order-fulfillment activity handlers.

mod add_order;
mod notify;
mod station;

use std::sync::Arc;

use counter_order::{OrderStatus, PlaceOrder, Station};
use counter_store::OrderRepository;
use counter_workflow::ActivityKind;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub use add_order::AddOrderHandler;
pub use notify::NotifyHandler;
pub use station::StationUpdateHandler;

use crate::error::{ActivityError, RegistryError};
use crate::gateway::CatalogGateway;
use crate::notifier::Notifier;
use crate::registry::ActivityRegistry;

/// Input of `AddOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOrderInput {
  pub order_id: Uuid,
  pub order: PlaceOrder,
}

/// Input of the station update activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRef {
  pub order_id: Uuid,
}

/// Input of `Notify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyInput {
  pub order_id: Uuid,
  pub message: String,
}

/// Bind the four fulfillment handlers over the given collaborators.
pub fn fulfillment_registry(
  orders: Arc<dyn OrderRepository>,
  catalog: Arc<dyn CatalogGateway>,
  notifier: Arc<dyn Notifier>,
) -> Result<ActivityRegistry, RegistryError> {
  ActivityRegistry::builder()
    .bind(
      ActivityKind::AddOrder,
      Arc::new(AddOrderHandler::new(orders.clone(), catalog)),
    )
    .bind(
      ActivityKind::BaristaUpdateOrder,
      Arc::new(StationUpdateHandler::new(
        orders.clone(),
        Station::Barista,
        OrderStatus::BaristaUpdated,
      )),
    )
    .bind(
      ActivityKind::KitchenUpdateOrder,
      Arc::new(StationUpdateHandler::new(
        orders.clone(),
        Station::Kitchen,
        OrderStatus::KitchenUpdated,
      )),
    )
    .bind(
      ActivityKind::Notify,
      Arc::new(NotifyHandler::new(orders, notifier)),
    )
    .build()
}

fn parse_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T, ActivityError> {
  serde_json::from_value(input).map_err(|e| ActivityError::permanent(format!("invalid input: {e}")))
}

fn to_output<T: Serialize>(value: &T) -> Result<serde_json::Value, ActivityError> {
  serde_json::to_value(value).map_err(ActivityError::permanent)
}
