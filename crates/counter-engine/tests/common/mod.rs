#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use counter_activity::{
  ActivityContext, ActivityError, ActivityExecutor, ActivityHandler, ActivityRegistry,
  AddOrderHandler, LogNotifier, NotifyHandler, StaticCatalog, StationUpdateHandler,
};
use counter_config::{CounterConfig, RetryBackoff, RetryPolicy};
use counter_engine::{Coordinator, WorkflowStatus};
use counter_order::{ItemDetails, OrderItemRequest, OrderSource, OrderStatus, PlaceOrder, Station};
use counter_store::{
  Error as StoreError, HistoryRecord, HistoryStore, InstanceStatus, OrderRepository,
  WorkflowInstance,
};
use counter_workflow::{ActivityKind, HistoryEvent};
use tokio::sync::Semaphore;

pub fn fast_config() -> CounterConfig {
  CounterConfig {
    retry: RetryPolicy {
      max_attempts: 3,
      initial_delay_ms: 1,
      max_delay_ms: 5,
      backoff: RetryBackoff::Constant,
    },
    activity_timeout_ms: 2_000,
    cycle_retry_delay_ms: 10,
    ..Default::default()
  }
}

pub fn catalog() -> StaticCatalog {
  StaticCatalog::with_items([
    ItemDetails {
      id: "A1".to_string(),
      name: "americano".to_string(),
      station: Station::Barista,
      price_cents: 300,
    },
    ItemDetails {
      id: "K1".to_string(),
      name: "bagel".to_string(),
      station: Station::Kitchen,
      price_cents: 250,
    },
  ])
}

pub fn place(items: &[(&str, u32)]) -> PlaceOrder {
  PlaceOrder {
    customer_id: Some("cust-9".to_string()),
    order_source: OrderSource::Counter,
    items: items
      .iter()
      .map(|(id, qty)| OrderItemRequest {
        id: id.to_string(),
        qty: *qty,
      })
      .collect(),
  }
}

/// Wraps a real handler, counting invocations and optionally failing or
/// blocking before delegating.
pub struct Scripted {
  inner: Arc<dyn ActivityHandler>,
  calls: AtomicU32,
  transient_failures: u32,
  permanent: Option<String>,
  gate: Option<Arc<Semaphore>>,
}

impl Scripted {
  pub fn wrap(inner: Arc<dyn ActivityHandler>) -> Self {
    Self {
      inner,
      calls: AtomicU32::new(0),
      transient_failures: 0,
      permanent: None,
      gate: None,
    }
  }

  pub fn failing_transiently(mut self, times: u32) -> Self {
    self.transient_failures = times;
    self
  }

  pub fn failing_permanently(mut self, message: &str) -> Self {
    self.permanent = Some(message.to_string());
    self
  }

  /// Each call waits for a permit from `gate`.
  pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ActivityHandler for Scripted {
  async fn handle(
    &self,
    ctx: &ActivityContext,
    input: serde_json::Value,
  ) -> Result<serde_json::Value, ActivityError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

    if let Some(gate) = &self.gate {
      gate
        .acquire()
        .await
        .map_err(ActivityError::transient)?
        .forget();
    }
    if let Some(message) = &self.permanent {
      return Err(ActivityError::permanent(message));
    }
    if call <= self.transient_failures {
      return Err(ActivityError::transient(format!("flaky call {call}")));
    }

    self.inner.handle(ctx, input).await
  }
}

/// The four fulfillment handlers, each wrapped in [`Scripted`].
pub struct Handlers {
  pub add_order: Arc<Scripted>,
  pub barista: Arc<Scripted>,
  pub kitchen: Arc<Scripted>,
  pub notify: Arc<Scripted>,
}

impl Handlers {
  pub fn standard(orders: Arc<dyn OrderRepository>) -> Self {
    Self::new(orders, |_, scripted| scripted)
  }

  pub fn new(
    orders: Arc<dyn OrderRepository>,
    script: impl Fn(ActivityKind, Scripted) -> Scripted,
  ) -> Self {
    let add_order: Arc<dyn ActivityHandler> =
      Arc::new(AddOrderHandler::new(orders.clone(), Arc::new(catalog())));
    let barista: Arc<dyn ActivityHandler> = Arc::new(StationUpdateHandler::new(
      orders.clone(),
      Station::Barista,
      OrderStatus::BaristaUpdated,
    ));
    let kitchen: Arc<dyn ActivityHandler> = Arc::new(StationUpdateHandler::new(
      orders.clone(),
      Station::Kitchen,
      OrderStatus::KitchenUpdated,
    ));
    let notify: Arc<dyn ActivityHandler> =
      Arc::new(NotifyHandler::new(orders, Arc::new(LogNotifier)));

    Self {
      add_order: Arc::new(script(ActivityKind::AddOrder, Scripted::wrap(add_order))),
      barista: Arc::new(script(ActivityKind::BaristaUpdateOrder, Scripted::wrap(barista))),
      kitchen: Arc::new(script(ActivityKind::KitchenUpdateOrder, Scripted::wrap(kitchen))),
      notify: Arc::new(script(ActivityKind::Notify, Scripted::wrap(notify))),
    }
  }

  pub fn registry(&self) -> ActivityRegistry {
    ActivityRegistry::builder()
      .bind(ActivityKind::AddOrder, self.add_order.clone())
      .bind(ActivityKind::BaristaUpdateOrder, self.barista.clone())
      .bind(ActivityKind::KitchenUpdateOrder, self.kitchen.clone())
      .bind(ActivityKind::Notify, self.notify.clone())
      .build_partial()
  }
}

/// Delegates to another store but fails the appends whose 1-based call
/// numbers are listed, without writing anything for them.
pub struct FlakyAppends {
  inner: Arc<dyn HistoryStore>,
  failing: Vec<u32>,
  appends: AtomicU32,
}

impl FlakyAppends {
  pub fn new(inner: Arc<dyn HistoryStore>, failing: &[u32]) -> Self {
    Self {
      inner,
      failing: failing.to_vec(),
      appends: AtomicU32::new(0),
    }
  }

  pub fn appends(&self) -> u32 {
    self.appends.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl HistoryStore for FlakyAppends {
  async fn create_instance(
    &self,
    instance: &WorkflowInstance,
    first_event: &HistoryEvent,
  ) -> Result<(), StoreError> {
    self.inner.create_instance(instance, first_event).await
  }

  async fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance, StoreError> {
    self.inner.get_instance(instance_id).await
  }

  async fn list_instances(
    &self,
    status: Option<InstanceStatus>,
  ) -> Result<Vec<WorkflowInstance>, StoreError> {
    self.inner.list_instances(status).await
  }

  async fn update_instance_status(
    &self,
    instance_id: &str,
    status: InstanceStatus,
    last_error: Option<&str>,
  ) -> Result<(), StoreError> {
    self
      .inner
      .update_instance_status(instance_id, status, last_error)
      .await
  }

  async fn append(&self, instance_id: &str, event: &HistoryEvent) -> Result<u64, StoreError> {
    let call = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
    if self.failing.contains(&call) {
      return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
    }
    self.inner.append(instance_id, event).await
  }

  async fn read_from(
    &self,
    instance_id: &str,
    position: u64,
  ) -> Result<Vec<HistoryRecord>, StoreError> {
    self.inner.read_from(instance_id, position).await
  }
}

pub fn coordinator(
  store: Arc<dyn HistoryStore>,
  orders: Arc<dyn OrderRepository>,
  registry: ActivityRegistry,
) -> Coordinator {
  let config = fast_config();
  let executor = ActivityExecutor::from_config(registry, &config);
  Coordinator::new(store, orders, executor, &config)
}

pub async fn wait_terminal(coordinator: &Coordinator, instance_id: &str) -> WorkflowStatus {
  tokio::time::timeout(Duration::from_secs(10), coordinator.wait(instance_id))
    .await
    .expect("instance did not reach a terminal status in time")
    .expect("wait failed")
}

/// Poll until `check` holds for the instance's history.
pub async fn wait_for_history(
  coordinator: &Coordinator,
  instance_id: &str,
  check: impl Fn(&[HistoryRecord]) -> bool,
) -> Vec<HistoryRecord> {
  for _ in 0..500 {
    let history = coordinator.history(instance_id).await.unwrap();
    if check(&history) {
      return history;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("history of {instance_id} never satisfied the condition");
}

pub fn scheduled(history: &[HistoryRecord]) -> Vec<ActivityKind> {
  history
    .iter()
    .filter_map(|record| match &record.event {
      HistoryEvent::ActivityScheduled { activity, .. } => Some(*activity),
      _ => None,
    })
    .collect()
}

/// `(seq, attempts)` of each completion, in history order.
pub fn completions(history: &[HistoryRecord]) -> Vec<(u64, u32)> {
  history
    .iter()
    .filter_map(|record| match &record.event {
      HistoryEvent::ActivityCompleted { seq, attempts, .. } => Some((*seq, *attempts)),
      _ => None,
    })
    .collect()
}
