//! In-memory store implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use counter_order::Order;
use counter_workflow::HistoryEvent;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
  Error, HistoryRecord, HistoryStore, InstanceStatus, OrderRepository, WorkflowInstance,
};

struct InstanceEntry {
  instance: WorkflowInstance,
  history: Vec<HistoryRecord>,
}

/// History store kept in process memory.
///
/// Every operation takes the single lock, so appends are trivially
/// serialized. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
  instances: RwLock<HashMap<String, InstanceEntry>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl HistoryStore for MemoryStore {
  async fn create_instance(
    &self,
    instance: &WorkflowInstance,
    first_event: &HistoryEvent,
  ) -> Result<(), Error> {
    let mut instances = self.instances.write().await;
    if instances.contains_key(&instance.instance_id) {
      return Err(Error::AlreadyExists(instance.instance_id.clone()));
    }

    instances.insert(
      instance.instance_id.clone(),
      InstanceEntry {
        instance: instance.clone(),
        history: vec![HistoryRecord {
          position: 0,
          event: first_event.clone(),
          recorded_at: instance.created_at,
        }],
      },
    );

    Ok(())
  }

  async fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance, Error> {
    self
      .instances
      .read()
      .await
      .get(instance_id)
      .map(|entry| entry.instance.clone())
      .ok_or_else(|| Error::NotFound(instance_id.to_string()))
  }

  async fn list_instances(
    &self,
    status: Option<InstanceStatus>,
  ) -> Result<Vec<WorkflowInstance>, Error> {
    let instances = self.instances.read().await;
    let mut found: Vec<WorkflowInstance> = instances
      .values()
      .map(|entry| &entry.instance)
      .filter(|instance| status.is_none_or(|s| instance.status == s))
      .cloned()
      .collect();
    found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(found)
  }

  async fn update_instance_status(
    &self,
    instance_id: &str,
    status: InstanceStatus,
    last_error: Option<&str>,
  ) -> Result<(), Error> {
    let mut instances = self.instances.write().await;
    let entry = instances
      .get_mut(instance_id)
      .ok_or_else(|| Error::NotFound(instance_id.to_string()))?;

    entry.instance.status = status;
    entry.instance.last_error = last_error.map(str::to_string);
    entry.instance.updated_at = Utc::now();
    Ok(())
  }

  async fn append(&self, instance_id: &str, event: &HistoryEvent) -> Result<u64, Error> {
    let mut instances = self.instances.write().await;
    let entry = instances
      .get_mut(instance_id)
      .ok_or_else(|| Error::NotFound(instance_id.to_string()))?;

    let position = entry.history.len() as u64;
    entry.history.push(HistoryRecord {
      position,
      event: event.clone(),
      recorded_at: Utc::now(),
    });
    Ok(position)
  }

  async fn read_from(
    &self,
    instance_id: &str,
    position: u64,
  ) -> Result<Vec<HistoryRecord>, Error> {
    let instances = self.instances.read().await;
    let entry = instances
      .get(instance_id)
      .ok_or_else(|| Error::NotFound(instance_id.to_string()))?;

    Ok(
      entry
        .history
        .iter()
        .filter(|record| record.position >= position)
        .cloned()
        .collect(),
    )
  }
}

/// Order repository kept in process memory.
#[derive(Default)]
pub struct MemoryOrderRepository {
  orders: RwLock<HashMap<Uuid, Order>>,
}

impl MemoryOrderRepository {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
  async fn save(&self, order: &Order) -> Result<Order, Error> {
    self.orders.write().await.insert(order.id, order.clone());
    Ok(order.clone())
  }

  async fn find_by_id(&self, order_id: Uuid) -> Result<Order, Error> {
    self
      .orders
      .read()
      .await
      .get(&order_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(order_id.to_string()))
  }

  async fn list(&self) -> Result<Vec<Order>, Error> {
    let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
    orders.sort_by_key(|order| (order.created_at(), order.id));
    Ok(orders)
  }
}
