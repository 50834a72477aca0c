//! Top-level entry point of the engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use counter_activity::ActivityExecutor;
use counter_config::CounterConfig;
use counter_order::{Order, OrderStatus, PlaceOrder};
use counter_store::{
  Error as StoreError, HistoryRecord, HistoryStore, InstanceStatus, OrderRepository,
  WorkflowInstance,
};
use counter_workflow::HistoryEvent;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::context::WorkflowDefinition;
use crate::error::EngineError;
use crate::fulfillment::{FulfillmentStage, OrderFulfillment};
use crate::replay::replay;
use crate::status::WorkflowStatus;
use crate::worker::{self, Message};

/// State shared by the coordinator and its instance workers.
pub(crate) struct Shared {
  pub(crate) store: Arc<dyn HistoryStore>,
  pub(crate) orders: Arc<dyn OrderRepository>,
  pub(crate) executor: Arc<ActivityExecutor>,
  pub(crate) definition: Arc<dyn WorkflowDefinition>,
  pub(crate) cycle_retry_delay: Duration,
  pub(crate) cancel: CancellationToken,
  pub(crate) tracker: TaskTracker,
  workers: Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>,
  statuses: Mutex<HashMap<String, watch::Sender<InstanceStatus>>>,
}

impl Shared {
  /// Deliver a message to the instance's worker, spawning one if needed.
  ///
  /// Gives the message back if the worker stopped before receiving it.
  fn send(self: &Arc<Self>, instance_id: &str, message: Message) -> Result<(), Message> {
    let sender = {
      let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
      workers
        .entry(instance_id.to_string())
        .or_insert_with(|| worker::spawn(self, instance_id))
        .clone()
    };
    sender.send(message).map_err(|e| e.0)
  }

  /// Remove a worker's registration. Returns false if another worker has
  /// taken over the instance.
  pub(crate) fn retire(&self, instance_id: &str, sender: &mpsc::UnboundedSender<Message>) -> bool {
    let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
    match workers.get(instance_id) {
      Some(registered) if registered.same_channel(sender) => {
        workers.remove(instance_id);
        self.release_status(&workers, instance_id);
        true
      }
      _ => false,
    }
  }

  /// Drop the instance's status channel once no worker publishes to it and
  /// nobody is waiting on it.
  fn release_status(
    &self,
    workers: &HashMap<String, mpsc::UnboundedSender<Message>>,
    instance_id: &str,
  ) {
    if workers.contains_key(instance_id) {
      return;
    }
    let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
    if statuses
      .get(instance_id)
      .is_some_and(|sender| sender.receiver_count() == 0)
    {
      statuses.remove(instance_id);
    }
  }

  fn release_waiter(&self, instance_id: &str) {
    let workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
    self.release_status(&workers, instance_id);
  }

  pub(crate) fn publish(&self, instance_id: &str, status: InstanceStatus) {
    let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
    match statuses.get(instance_id) {
      Some(sender) => {
        sender.send_replace(status);
      }
      None => {
        statuses.insert(instance_id.to_string(), watch::channel(status).0);
      }
    }
  }

  fn subscribe(&self, instance_id: &str) -> watch::Receiver<InstanceStatus> {
    let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
    statuses
      .entry(instance_id.to_string())
      .or_insert_with(|| watch::channel(InstanceStatus::Running).0)
      .subscribe()
  }

  /// Move the instance's order, if one was added, to `failed`.
  pub(crate) async fn mark_order_failed(&self, instance_id: &str) {
    let order_id = Order::id_for_instance(instance_id);
    let mut order = match self.orders.find_by_id(order_id).await {
      Ok(order) => order,
      Err(StoreError::NotFound(_)) => return,
      Err(e) => {
        warn!(instance_id = %instance_id, error = %e, "failed to load order");
        return;
      }
    };

    match order.advance(OrderStatus::Failed, Utc::now()) {
      Ok(true) => {
        if let Err(e) = self.orders.save(&order).await {
          warn!(instance_id = %instance_id, error = %e, "failed to mark order failed");
        }
      }
      Ok(false) => {}
      Err(e) => debug!(instance_id = %instance_id, error = %e, "order left as is"),
    }
  }
}

/// Accepts requests for workflow instances and drives their decision cycles.
///
/// Every instance with work outstanding has a worker task that owns its
/// decision cycles, so at most one cycle per instance runs at a time while
/// different instances proceed in parallel. Activities run on separate
/// tasks and report back to the worker when they finish.
#[derive(Clone)]
pub struct Coordinator {
  shared: Arc<Shared>,
}

impl Coordinator {
  /// A coordinator running the order-fulfillment workflow.
  pub fn new(
    store: Arc<dyn HistoryStore>,
    orders: Arc<dyn OrderRepository>,
    executor: ActivityExecutor,
    config: &CounterConfig,
  ) -> Self {
    Self::with_definition(store, orders, executor, Arc::new(OrderFulfillment), config)
  }

  pub fn with_definition(
    store: Arc<dyn HistoryStore>,
    orders: Arc<dyn OrderRepository>,
    executor: ActivityExecutor,
    definition: Arc<dyn WorkflowDefinition>,
    config: &CounterConfig,
  ) -> Self {
    Self {
      shared: Arc::new(Shared {
        store,
        orders,
        executor: Arc::new(executor),
        definition,
        cycle_retry_delay: config.cycle_retry_delay(),
        cancel: CancellationToken::new(),
        tracker: TaskTracker::new(),
        workers: Mutex::new(HashMap::new()),
        statuses: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Start a new instance for `order`.
  ///
  /// Fails with [`EngineError::InstanceAlreadyExists`] if the id is taken,
  /// whatever the existing instance's status.
  pub async fn start(&self, instance_id: &str, order: PlaceOrder) -> Result<String, EngineError> {
    self
      .start_with_input(instance_id, serde_json::to_value(&order)?)
      .await
  }

  /// Start a new instance with a raw input payload.
  #[instrument(skip(self, input), fields(instance_id = %instance_id))]
  pub async fn start_with_input(
    &self,
    instance_id: &str,
    input: serde_json::Value,
  ) -> Result<String, EngineError> {
    if self.shared.cancel.is_cancelled() {
      return Err(EngineError::ShuttingDown);
    }

    let instance = WorkflowInstance::new(instance_id, Utc::now());
    match self
      .shared
      .store
      .create_instance(&instance, &HistoryEvent::WorkflowStarted { input })
      .await
    {
      Ok(()) => {}
      Err(StoreError::AlreadyExists(_)) => {
        let existing = self.instance(instance_id).await?;
        warn!(status = %existing.status, "instance already exists");
        return Err(EngineError::InstanceAlreadyExists {
          instance_id: instance_id.to_string(),
          status: existing.status,
        });
      }
      Err(e) => return Err(e.into()),
    }

    info!(
      event = "workflow_started",
      workflow = %self.shared.definition.name(),
      "workflow started"
    );
    self.shared.publish(instance_id, InstanceStatus::Running);
    // A fresh worker cannot have stopped yet.
    let _ = self.shared.send(instance_id, Message::RunCycle);
    Ok(instance_id.to_string())
  }

  /// Record an out-of-band signal and run a decision cycle.
  #[instrument(skip(self, data), fields(instance_id = %instance_id))]
  pub async fn raise_event(
    &self,
    instance_id: &str,
    name: &str,
    data: serde_json::Value,
  ) -> Result<(), EngineError> {
    let (reply, response) = oneshot::channel();
    self
      .deliver(
        instance_id,
        Message::RaiseEvent {
          name: name.to_string(),
          data,
          reply,
        },
        response,
      )
      .await
  }

  /// Terminate a running instance.
  ///
  /// Activities already executing are left to finish; their outcomes are
  /// recorded but no further activity is scheduled.
  #[instrument(skip(self), fields(instance_id = %instance_id))]
  pub async fn terminate(&self, instance_id: &str, reason: &str) -> Result<(), EngineError> {
    let (reply, response) = oneshot::channel();
    self
      .deliver(
        instance_id,
        Message::Terminate {
          reason: reason.to_string(),
          reply,
        },
        response,
      )
      .await
  }

  async fn deliver(
    &self,
    instance_id: &str,
    message: Message,
    response: oneshot::Receiver<Result<(), EngineError>>,
  ) -> Result<(), EngineError> {
    let instance = self.instance(instance_id).await?;
    if instance.status.is_terminal() {
      return Err(EngineError::InstanceTerminal {
        instance_id: instance_id.to_string(),
        status: instance.status,
      });
    }
    if self.shared.cancel.is_cancelled() {
      return Err(EngineError::ShuttingDown);
    }

    if self.shared.send(instance_id, message).is_err() {
      let instance = self.instance(instance_id).await?;
      return Err(EngineError::InstanceTerminal {
        instance_id: instance_id.to_string(),
        status: instance.status,
      });
    }

    response.await.unwrap_or(Err(EngineError::ShuttingDown))
  }

  /// Current state of an instance and its order.
  pub async fn get_status(&self, instance_id: &str) -> Result<WorkflowStatus, EngineError> {
    let instance = self.instance(instance_id).await?;
    let (stage, history_len) = match self.history(instance_id).await {
      Ok(records) => {
        let history: Vec<HistoryEvent> = records.into_iter().map(|record| record.event).collect();
        let stage = match replay(self.shared.definition.as_ref(), instance_id, &history) {
          Ok(replay) => FulfillmentStage::from_replay(&replay),
          Err(_) => FulfillmentStage::Failed,
        };
        (stage, history.len() as u64)
      }
      Err(EngineError::Store(StoreError::Corrupt { position, .. })) => {
        (FulfillmentStage::Failed, position)
      }
      Err(e) => return Err(e),
    };

    let order = match self
      .shared
      .orders
      .find_by_id(Order::id_for_instance(instance_id))
      .await
    {
      Ok(order) => Some(order),
      Err(StoreError::NotFound(_)) => None,
      Err(e) => return Err(e.into()),
    };

    Ok(WorkflowStatus {
      instance_id: instance.instance_id,
      status: instance.status,
      stage,
      last_error: instance.last_error,
      history_len,
      order,
      created_at: instance.created_at,
      updated_at: instance.updated_at,
    })
  }

  /// The committed history of an instance.
  pub async fn history(&self, instance_id: &str) -> Result<Vec<HistoryRecord>, EngineError> {
    self
      .shared
      .store
      .read_from(instance_id, 0)
      .await
      .map_err(|e| EngineError::lookup(instance_id, e))
  }

  /// Wait until the instance reaches a terminal status.
  pub async fn wait(&self, instance_id: &str) -> Result<WorkflowStatus, EngineError> {
    let waited = self.wait_terminal(instance_id).await;
    self.shared.release_waiter(instance_id);
    waited?;
    self.get_status(instance_id).await
  }

  async fn wait_terminal(&self, instance_id: &str) -> Result<(), EngineError> {
    let mut status = self.shared.subscribe(instance_id);
    let instance = self.instance(instance_id).await?;
    if instance.status.is_terminal() {
      return Ok(());
    }

    tokio::select! {
      changed = async { status.wait_for(|s| s.is_terminal()).await.map(|_| ()) } => {
        changed.map_err(|_| EngineError::ShuttingDown)
      }
      _ = self.shared.cancel.cancelled() => Err(EngineError::ShuttingDown),
    }
  }

  /// Resume every running instance, re-dispatching activities that were
  /// scheduled but never completed. Returns the number of instances resumed.
  #[instrument(skip(self))]
  pub async fn recover(&self) -> Result<usize, EngineError> {
    let running = self
      .shared
      .store
      .list_instances(Some(InstanceStatus::Running))
      .await?;

    for instance in &running {
      self.shared.publish(&instance.instance_id, InstanceStatus::Running);
      let _ = self.shared.send(&instance.instance_id, Message::RunCycle);
    }

    info!(count = running.len(), "resumed running instances");
    Ok(running.len())
  }

  /// Stop all workers and wait for them and any executing activity to exit.
  pub async fn shutdown(&self) {
    self.shared.cancel.cancel();
    self.shared.tracker.close();
    self.shared.tracker.wait().await;
    info!("coordinator stopped");
  }

  async fn instance(&self, instance_id: &str) -> Result<WorkflowInstance, EngineError> {
    self
      .shared
      .store
      .get_instance(instance_id)
      .await
      .map_err(|e| EngineError::lookup(instance_id, e))
  }
}
