use chrono::{DateTime, Utc};
use counter_order::Order;
use counter_store::InstanceStatus;
use serde::Serialize;

use crate::fulfillment::FulfillmentStage;

/// Snapshot returned by [`Coordinator::get_status`](crate::Coordinator::get_status).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
  pub instance_id: String,
  pub status: InstanceStatus,
  pub stage: FulfillmentStage,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
  pub history_len: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub order: Option<Order>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
