mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{
  FlakyAppends, Handlers, completions, coordinator, place, scheduled, wait_for_history,
  wait_terminal,
};
use counter_activity::ActivityRegistry;
use counter_engine::{EngineError, FulfillmentStage};
use counter_order::{Order, OrderStatus};
use counter_store::{
  HistoryStore, InstanceStatus, MemoryOrderRepository, MemoryStore, OrderRepository,
  WorkflowInstance,
};
use counter_workflow::{ActivityKind, FailureKind, HistoryEvent};
use serde_json::json;
use tokio::sync::Semaphore;

fn memory() -> (Arc<MemoryStore>, Arc<MemoryOrderRepository>) {
  (
    Arc::new(MemoryStore::new()),
    Arc::new(MemoryOrderRepository::new()),
  )
}

#[tokio::test]
async fn test_happy_path_completes_in_order() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());
  let coordinator = coordinator(store, orders.clone(), handlers.registry());

  let id = coordinator.start("ord-1", place(&[("A1", 2)])).await.unwrap();
  assert_eq!(id, "ord-1");

  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Completed);
  assert_eq!(status.stage, FulfillmentStage::Completed);
  assert_eq!(status.last_error, None);

  let order = status.order.expect("order snapshot");
  assert_eq!(order.status, OrderStatus::Notified);
  assert_eq!(order.line_items[0].quantity, 2);
  assert_eq!(order.total_cents(), 600);

  let history = coordinator.history("ord-1").await.unwrap();
  assert_eq!(
    scheduled(&history),
    vec![
      ActivityKind::AddOrder,
      ActivityKind::BaristaUpdateOrder,
      ActivityKind::KitchenUpdateOrder,
      ActivityKind::Notify,
    ]
  );
  assert_eq!(
    completions(&history),
    vec![(0, 1), (1, 1), (2, 1), (3, 1)]
  );
  assert!(matches!(
    history.last().map(|r| &r.event),
    Some(HistoryEvent::WorkflowCompleted { .. })
  ));
  assert_eq!(status.history_len, history.len() as u64);

  for (position, record) in history.iter().enumerate() {
    assert_eq!(record.position, position as u64);
  }

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_permanent_kitchen_failure_fails_workflow() {
  let (store, orders) = memory();
  let handlers = Handlers::new(orders.clone(), |kind, scripted| match kind {
    ActivityKind::KitchenUpdateOrder => scripted.failing_permanently("oven offline"),
    _ => scripted,
  });
  let coordinator = coordinator(store, orders.clone(), handlers.registry());

  coordinator.start("ord-1", place(&[("A1", 2)])).await.unwrap();
  let status = wait_terminal(&coordinator, "ord-1").await;

  assert_eq!(status.status, InstanceStatus::Failed);
  assert_eq!(status.stage, FulfillmentStage::Failed);
  let error = status.last_error.expect("last error");
  assert!(error.contains("KitchenUpdateOrder"), "{error}");
  assert!(error.contains("oven offline"), "{error}");

  let history = coordinator.history("ord-1").await.unwrap();
  assert!(!scheduled(&history).contains(&ActivityKind::Notify));
  assert_eq!(completions(&history).len(), 2);
  assert!(history.iter().any(|r| matches!(
    &r.event,
    HistoryEvent::ActivityFailed { seq: 2, failure } if failure.kind == FailureKind::Failed && failure.attempts == 1
  )));
  assert_eq!(handlers.kitchen.calls(), 1);
  assert_eq!(handlers.notify.calls(), 0);

  let order = orders.find_by_id(Order::id_for_instance("ord-1")).await.unwrap();
  assert_eq!(order.status, OrderStatus::Failed);

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_start_is_rejected() {
  let (store, orders) = memory();
  let gate = Arc::new(Semaphore::new(0));
  let handlers = Handlers::new(orders.clone(), |kind, scripted| match kind {
    ActivityKind::AddOrder => scripted.gated(gate.clone()),
    _ => scripted,
  });
  let coordinator = coordinator(store, orders.clone(), handlers.registry());

  coordinator.start("ord-1", place(&[("A1", 2)])).await.unwrap();
  let err = coordinator
    .start("ord-1", place(&[("K1", 5)]))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    EngineError::InstanceAlreadyExists {
      status: InstanceStatus::Running,
      ..
    }
  ));

  gate.add_permits(1);
  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Completed);

  let order = status.order.unwrap();
  assert_eq!(order.line_items.len(), 1);
  assert_eq!(order.line_items[0].item_id, "A1");

  let err = coordinator
    .start("ord-1", place(&[("A1", 1)]))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    EngineError::InstanceAlreadyExists {
      status: InstanceStatus::Completed,
      ..
    }
  ));

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried_within_one_call() {
  let (store, orders) = memory();
  let handlers = Handlers::new(orders.clone(), |kind, scripted| match kind {
    ActivityKind::BaristaUpdateOrder => scripted.failing_transiently(2),
    _ => scripted,
  });
  let coordinator = coordinator(store, orders, handlers.registry());

  coordinator.start("ord-1", place(&[("A1", 1)])).await.unwrap();
  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Completed);

  let history = coordinator.history("ord-1").await.unwrap();
  let barista: Vec<_> = completions(&history)
    .into_iter()
    .filter(|(seq, _)| *seq == 1)
    .collect();
  assert_eq!(barista, vec![(1, 3)]);
  assert_eq!(handlers.barista.calls(), 3);

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_fail_workflow() {
  let (store, orders) = memory();
  let handlers = Handlers::new(orders.clone(), |kind, scripted| match kind {
    ActivityKind::Notify => scripted.failing_transiently(u32::MAX),
    _ => scripted,
  });
  let coordinator = coordinator(store, orders, handlers.registry());

  coordinator.start("ord-1", place(&[("A1", 1)])).await.unwrap();
  let status = wait_terminal(&coordinator, "ord-1").await;

  assert_eq!(status.status, InstanceStatus::Failed);
  assert_eq!(handlers.notify.calls(), 3);

  let history = coordinator.history("ord-1").await.unwrap();
  assert!(history.iter().any(|r| matches!(
    &r.event,
    HistoryEvent::ActivityFailed { seq: 3, failure } if failure.kind == FailureKind::Exhausted && failure.attempts == 3
  )));
  assert_eq!(
    status.order.map(|o| o.status),
    Some(OrderStatus::Failed)
  );

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_unbound_activity_fails_workflow() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());
  let registry = ActivityRegistry::builder()
    .bind(ActivityKind::AddOrder, handlers.add_order.clone())
    .build_partial();
  let coordinator = coordinator(store, orders, registry);

  coordinator.start("ord-1", place(&[("A1", 1)])).await.unwrap();
  let status = wait_terminal(&coordinator, "ord-1").await;

  assert_eq!(status.status, InstanceStatus::Failed);
  let history = coordinator.history("ord-1").await.unwrap();
  assert!(history.iter().any(|r| matches!(
    &r.event,
    HistoryEvent::ActivityFailed { seq: 1, failure } if failure.kind == FailureKind::UnknownActivity
  )));

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_order_fails_at_add_order() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());
  let coordinator = coordinator(store, orders, handlers.registry());

  coordinator.start("ord-1", place(&[])).await.unwrap();
  let status = wait_terminal(&coordinator, "ord-1").await;

  assert_eq!(status.status, InstanceStatus::Failed);
  assert_eq!(status.stage, FulfillmentStage::Failed);
  assert!(status.order.is_none());
  assert_eq!(handlers.barista.calls(), 0);

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_terminate_records_late_completion_without_scheduling() {
  let (store, orders) = memory();
  let gate = Arc::new(Semaphore::new(0));
  let handlers = Handlers::new(orders.clone(), |kind, scripted| match kind {
    ActivityKind::AddOrder => scripted.gated(gate.clone()),
    _ => scripted,
  });
  let coordinator = coordinator(store, orders, handlers.registry());

  coordinator.start("ord-1", place(&[("A1", 1)])).await.unwrap();
  wait_for_history(&coordinator, "ord-1", |h| !scheduled(h).is_empty()).await;

  coordinator
    .terminate("ord-1", "customer left")
    .await
    .unwrap();
  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Terminated);
  assert_eq!(status.stage, FulfillmentStage::Terminated);

  gate.add_permits(1);
  let history = wait_for_history(&coordinator, "ord-1", |h| !completions(h).is_empty()).await;

  assert_eq!(scheduled(&history), vec![ActivityKind::AddOrder]);
  assert!(matches!(
    history[2].event,
    HistoryEvent::WorkflowTerminated { .. }
  ));
  assert!(matches!(
    history[3].event,
    HistoryEvent::ActivityCompleted { seq: 0, .. }
  ));
  assert_eq!(
    coordinator.get_status("ord-1").await.unwrap().status,
    InstanceStatus::Terminated
  );

  let err = coordinator.terminate("ord-1", "again").await.unwrap_err();
  assert!(matches!(
    err,
    EngineError::InstanceTerminal {
      status: InstanceStatus::Terminated,
      ..
    }
  ));

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_raise_event_is_recorded() {
  let (store, orders) = memory();
  let gate = Arc::new(Semaphore::new(0));
  let handlers = Handlers::new(orders.clone(), |kind, scripted| match kind {
    ActivityKind::AddOrder => scripted.gated(gate.clone()),
    _ => scripted,
  });
  let coordinator = coordinator(store, orders, handlers.registry());

  coordinator.start("ord-1", place(&[("A1", 1)])).await.unwrap();
  coordinator
    .raise_event("ord-1", "rush", json!({ "priority": 1 }))
    .await
    .unwrap();

  gate.add_permits(1);
  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Completed);

  let history = coordinator.history("ord-1").await.unwrap();
  assert!(history.iter().any(|r| matches!(
    &r.event,
    HistoryEvent::EventRaised { name, .. } if name == "rush"
  )));

  let err = coordinator
    .raise_event("ord-1", "late", json!(null))
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::InstanceTerminal { .. }));

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_unknown_instance() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());
  let coordinator = coordinator(store, orders, handlers.registry());

  assert!(matches!(
    coordinator.get_status("missing").await,
    Err(EngineError::NotFound(_))
  ));
  assert!(matches!(
    coordinator.terminate("missing", "no reason").await,
    Err(EngineError::NotFound(_))
  ));
  assert!(matches!(
    coordinator.history("missing").await,
    Err(EngineError::NotFound(_))
  ));
}

#[tokio::test]
async fn test_instances_run_independently() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());
  let coordinator = coordinator(store, orders, handlers.registry());

  for n in 0..8 {
    coordinator
      .start(&format!("ord-{n}"), place(&[("A1", 1), ("K1", n + 1)]))
      .await
      .unwrap();
  }

  for n in 0..8 {
    let status = wait_terminal(&coordinator, &format!("ord-{n}")).await;
    assert_eq!(status.status, InstanceStatus::Completed);
    assert_eq!(status.order.unwrap().line_items[1].quantity, n + 1);
  }
  assert_eq!(handlers.add_order.calls(), 8);

  coordinator.shutdown().await;
}

async fn seed(store: &MemoryStore, instance_id: &str, events: Vec<HistoryEvent>) {
  let mut events = events.into_iter();
  let first = events.next().unwrap();
  store
    .create_instance(&WorkflowInstance::new(instance_id, Utc::now()), &first)
    .await
    .unwrap();
  for event in events {
    store.append(instance_id, &event).await.unwrap();
  }
}

/// The AddOrder call the fulfillment workflow makes for `ord-1`.
fn add_order_call() -> (HistoryEvent, serde_json::Value) {
  let place = place(&[("A1", 2)]);
  let input = json!({
    "orderId": Order::id_for_instance("ord-1"),
    "order": serde_json::to_value(&place).unwrap(),
  });
  (
    HistoryEvent::WorkflowStarted {
      input: serde_json::to_value(&place).unwrap(),
    },
    input,
  )
}

#[tokio::test]
async fn test_recovery_resumes_after_completed_add_order() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());

  // AddOrder ran to completion before the crash.
  let (started, input) = add_order_call();
  handlers
    .registry()
    .get(ActivityKind::AddOrder)
    .unwrap()
    .handle(
      &counter_activity::ActivityContext {
        instance_id: "ord-1".to_string(),
        seq: 0,
        attempt: 1,
      },
      input.clone(),
    )
    .await
    .unwrap();
  let order = orders.find_by_id(Order::id_for_instance("ord-1")).await.unwrap();

  seed(
    &store,
    "ord-1",
    vec![
      started,
      HistoryEvent::ActivityScheduled {
        seq: 0,
        activity: ActivityKind::AddOrder,
        input,
      },
      HistoryEvent::ActivityCompleted {
        seq: 0,
        output: serde_json::to_value(&order).unwrap(),
        attempts: 1,
      },
    ],
  )
  .await;

  let coordinator = coordinator(store, orders, handlers.registry());
  assert_eq!(
    coordinator.get_status("ord-1").await.unwrap().stage,
    FulfillmentStage::OrderAdded
  );
  assert_eq!(coordinator.recover().await.unwrap(), 1);

  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Completed);

  let history = coordinator.history("ord-1").await.unwrap();
  assert_eq!(
    scheduled(&history)
      .iter()
      .filter(|a| **a == ActivityKind::AddOrder)
      .count(),
    1
  );
  assert_eq!(handlers.add_order.calls(), 1);

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_recovery_redispatches_call_without_outcome() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());

  let (started, input) = add_order_call();
  seed(
    &store,
    "ord-1",
    vec![
      started,
      HistoryEvent::ActivityScheduled {
        seq: 0,
        activity: ActivityKind::AddOrder,
        input,
      },
    ],
  )
  .await;

  let coordinator = coordinator(store, orders, handlers.registry());
  coordinator.recover().await.unwrap();

  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Completed);
  assert_eq!(handlers.add_order.calls(), 1);

  let history = coordinator.history("ord-1").await.unwrap();
  assert_eq!(scheduled(&history).len(), 4);
  assert_eq!(completions(&history)[0], (0, 1));

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_divergent_history_halts_instance() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());

  let (started, _) = add_order_call();
  seed(
    &store,
    "ord-1",
    vec![
      started,
      HistoryEvent::ActivityScheduled {
        seq: 0,
        activity: ActivityKind::KitchenUpdateOrder,
        input: json!({ "orderId": Order::id_for_instance("ord-1") }),
      },
    ],
  )
  .await;

  let coordinator = coordinator(store, orders, handlers.registry());
  coordinator.recover().await.unwrap();

  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Failed);
  assert!(
    status
      .last_error
      .as_deref()
      .is_some_and(|e| e.contains("non-determinism")),
    "{:?}",
    status.last_error
  );
  assert_eq!(status.history_len, 2);
  assert_eq!(handlers.kitchen.calls(), 0);
  assert_eq!(handlers.add_order.calls(), 0);

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_failed_appends_retry_from_committed_position() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());
  // Append 3 schedules BaristaUpdateOrder. After its retry, append 7
  // records the KitchenUpdateOrder outcome.
  let flaky = Arc::new(FlakyAppends::new(store, &[3, 7]));
  let coordinator = coordinator(flaky.clone(), orders, handlers.registry());

  coordinator.start("ord-1", place(&[("A1", 1), ("K1", 1)])).await.unwrap();
  let status = wait_terminal(&coordinator, "ord-1").await;
  assert_eq!(status.status, InstanceStatus::Completed);
  assert_eq!(status.order.unwrap().status, OrderStatus::Notified);

  let history = coordinator.history("ord-1").await.unwrap();
  assert_eq!(
    scheduled(&history),
    vec![
      ActivityKind::AddOrder,
      ActivityKind::BaristaUpdateOrder,
      ActivityKind::KitchenUpdateOrder,
      ActivityKind::Notify,
    ]
  );
  assert_eq!(completions(&history).len(), 4);
  assert_eq!(history.len(), 10);
  for (index, record) in history.iter().enumerate() {
    assert_eq!(record.position, index as u64);
  }
  assert_eq!(flaky.appends(), 11);

  assert_eq!(handlers.add_order.calls(), 1);
  assert_eq!(handlers.barista.calls(), 1);
  assert_eq!(handlers.kitchen.calls(), 1);
  assert_eq!(handlers.notify.calls(), 1);

  coordinator.shutdown().await;
}

#[tokio::test]
async fn test_start_after_shutdown_is_rejected() {
  let (store, orders) = memory();
  let handlers = Handlers::standard(orders.clone());
  let coordinator = coordinator(store, orders, handlers.registry());

  coordinator.shutdown().await;
  assert!(matches!(
    coordinator.start("ord-1", place(&[("A1", 1)])).await,
    Err(EngineError::ShuttingDown)
  ));
}
