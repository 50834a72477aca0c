//! Per-instance mailbox worker.
//!
//! Each worker consumes its instance's messages one at a time, so decision
//! cycles for an instance never overlap. A worker stops once its instance
//! is terminal and no activity it dispatched is still executing.

use std::collections::HashSet;
use std::sync::Arc;

use counter_activity::{ActivityOutput, ExecutionError};
use counter_store::InstanceStatus;
use counter_workflow::{ActivityKind, HistoryEvent};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::coordinator::Shared;
use crate::error::{EngineError, ReplayError};
use crate::replay::{NextAction, ReplayStatus, replay};

pub(crate) enum Message {
  RunCycle,
  ActivityFinished {
    seq: u64,
    activity: ActivityKind,
    result: Result<ActivityOutput, ExecutionError>,
  },
  RaiseEvent {
    name: String,
    data: serde_json::Value,
    reply: oneshot::Sender<Result<(), EngineError>>,
  },
  Terminate {
    reason: String,
    reply: oneshot::Sender<Result<(), EngineError>>,
  },
}

/// Spawn the worker for a running instance and return its mailbox.
pub(crate) fn spawn(shared: &Arc<Shared>, instance_id: &str) -> mpsc::UnboundedSender<Message> {
  let (sender, receiver) = mpsc::unbounded_channel();
  let worker = InstanceWorker {
    instance_id: instance_id.to_string(),
    shared: shared.clone(),
    sender: sender.clone(),
    history: Vec::new(),
    status: InstanceStatus::Running,
    in_flight: HashSet::new(),
    halted: false,
  };
  shared.tracker.spawn(worker.run(receiver));
  sender
}

struct InstanceWorker {
  instance_id: String,
  shared: Arc<Shared>,
  sender: mpsc::UnboundedSender<Message>,
  /// Committed history, extended incrementally from the store.
  history: Vec<HistoryEvent>,
  /// Status last written to the instance record.
  status: InstanceStatus,
  in_flight: HashSet<u64>,
  /// Replay failed; nothing more is recorded for the instance.
  halted: bool,
}

impl InstanceWorker {
  async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Message>) {
    debug!(instance_id = %self.instance_id, "instance worker started");

    loop {
      let message = tokio::select! {
        _ = self.shared.cancel.cancelled() => break,
        message = receiver.recv() => match message {
          Some(message) => message,
          None => break,
        },
      };

      self.handle(message).await;

      if self.is_finished() && self.shared.retire(&self.instance_id, &self.sender) {
        receiver.close();
        while let Ok(message) = receiver.try_recv() {
          self.reject(message);
        }
        break;
      }
    }

    debug!(instance_id = %self.instance_id, "instance worker stopped");
  }

  fn is_finished(&self) -> bool {
    self.in_flight.is_empty() && self.status.is_terminal()
  }

  async fn handle(&mut self, message: Message) {
    match message {
      Message::RunCycle => {
        if !self.stopped() {
          self.cycle().await;
        }
      }
      Message::ActivityFinished {
        seq,
        activity,
        result,
      } => {
        self.in_flight.remove(&seq);
        if self.halted {
          debug!(instance_id = %self.instance_id, seq, "dropping outcome of halted instance");
          if !self.stopped() {
            self.cycle().await;
          }
          return;
        }
        self.record_outcome(seq, activity, result).await;
        self.cycle().await;
      }
      Message::RaiseEvent { name, data, reply } => {
        let result = self.raise(name, data).await;
        let raised = result.is_ok();
        let _ = reply.send(result);
        if raised {
          self.cycle().await;
        }
      }
      Message::Terminate { reason, reply } => {
        let result = self.terminate(reason).await;
        let _ = reply.send(result);
      }
    }
  }

  fn reject(&self, message: Message) {
    let err = || EngineError::InstanceTerminal {
      instance_id: self.instance_id.clone(),
      status: self.status,
    };
    match message {
      Message::RaiseEvent { reply, .. } | Message::Terminate { reply, .. } => {
        let _ = reply.send(Err(err()));
      }
      Message::RunCycle | Message::ActivityFinished { .. } => {}
    }
  }

  /// Run a decision cycle, retrying from the last committed position until
  /// it goes through or the coordinator shuts down.
  async fn cycle(&mut self) {
    loop {
      match self.try_cycle().await {
        Ok(()) => return,
        Err(_) if self.stopped() => return,
        Err(e) => {
          warn!(
            instance_id = %self.instance_id,
            error = %e,
            "decision cycle failed, retrying"
          );
          if !self.pause().await {
            return;
          }
        }
      }
    }
  }

  /// Halted and recorded as failed, so retrying cannot help.
  fn stopped(&self) -> bool {
    self.halted && self.status == InstanceStatus::Failed
  }

  /// Sleep for the retry delay. Returns false if shut down meanwhile.
  async fn pause(&self) -> bool {
    tokio::select! {
      _ = tokio::time::sleep(self.shared.cycle_retry_delay) => true,
      _ = self.shared.cancel.cancelled() => false,
    }
  }

  async fn try_cycle(&mut self) -> Result<(), counter_store::Error> {
    self.catch_up().await?;

    let replay = match replay(
      self.shared.definition.as_ref(),
      &self.instance_id,
      &self.history,
    ) {
      Ok(replay) => replay,
      Err(err) => return self.halt(err).await,
    };

    match &replay.status {
      ReplayStatus::Running => {}
      ReplayStatus::Completed { .. } => {
        return self.settle(InstanceStatus::Completed, None).await;
      }
      ReplayStatus::Failed { error } => {
        return self.settle(InstanceStatus::Failed, Some(error.as_str())).await;
      }
      ReplayStatus::Terminated { .. } => {
        return self.settle(InstanceStatus::Terminated, None).await;
      }
    }

    for call in &replay.pending {
      if !self.in_flight.contains(&call.seq) {
        info!(
          instance_id = %self.instance_id,
          seq = call.seq,
          activity = %call.activity,
          "re-dispatching activity without outcome"
        );
        self.dispatch(call.seq, call.activity, call.input.clone());
      }
    }

    for action in replay.next_actions {
      match action {
        NextAction::ScheduleActivity {
          seq,
          activity,
          input,
        } => {
          self
            .append(HistoryEvent::ActivityScheduled {
              seq,
              activity,
              input: input.clone(),
            })
            .await?;
          info!(
            event = "activity_scheduled",
            instance_id = %self.instance_id,
            seq,
            activity = %activity,
            "activity scheduled"
          );
          self.dispatch(seq, activity, input);
        }
        NextAction::CompleteWorkflow { output } => {
          self
            .append(HistoryEvent::WorkflowCompleted { output })
            .await?;
          info!(
            event = "workflow_completed",
            instance_id = %self.instance_id,
            "workflow completed"
          );
          self.settle(InstanceStatus::Completed, None).await?;
        }
        NextAction::FailWorkflow { error } => {
          self
            .append(HistoryEvent::WorkflowFailed {
              error: error.clone(),
            })
            .await?;
          error!(
            event = "workflow_failed",
            instance_id = %self.instance_id,
            error = %error,
            "workflow failed"
          );
          self.settle(InstanceStatus::Failed, Some(error.as_str())).await?;
        }
      }
    }

    Ok(())
  }

  fn dispatch(&mut self, seq: u64, activity: ActivityKind, input: serde_json::Value) {
    self.in_flight.insert(seq);

    let executor = self.shared.executor.clone();
    let sender = self.sender.clone();
    let instance_id = self.instance_id.clone();
    let cancel = self.shared.cancel.child_token();

    self.shared.tracker.spawn(async move {
      let result = executor
        .execute(&instance_id, seq, activity, input, cancel)
        .await;
      // The worker is gone only during shutdown.
      let _ = sender.send(Message::ActivityFinished {
        seq,
        activity,
        result,
      });
    });
  }

  /// Append the outcome of an activity call, retrying on store errors.
  async fn record_outcome(
    &mut self,
    seq: u64,
    activity: ActivityKind,
    result: Result<ActivityOutput, ExecutionError>,
  ) {
    let event = match result {
      Ok(output) => HistoryEvent::ActivityCompleted {
        seq,
        output: output.output,
        attempts: output.attempts,
      },
      Err(err) => match err.to_failure() {
        Some(failure) => HistoryEvent::ActivityFailed { seq, failure },
        None => {
          debug!(instance_id = %self.instance_id, seq, "activity cancelled");
          return;
        }
      },
    };

    loop {
      match self.try_record(seq, activity, &event).await {
        Ok(()) => return,
        Err(_) if self.stopped() => return,
        Err(e) => {
          warn!(
            instance_id = %self.instance_id,
            seq,
            error = %e,
            "failed to record activity outcome, retrying"
          );
          if !self.pause().await {
            return;
          }
        }
      }
    }
  }

  async fn try_record(
    &mut self,
    seq: u64,
    activity: ActivityKind,
    event: &HistoryEvent,
  ) -> Result<(), counter_store::Error> {
    self.catch_up().await?;

    let finished = self.history.iter().any(|e| {
      matches!(
        e,
        HistoryEvent::WorkflowCompleted { .. } | HistoryEvent::WorkflowFailed { .. }
      )
    });
    if finished || self.has_outcome(seq) {
      debug!(instance_id = %self.instance_id, seq, "outcome not recorded");
      return Ok(());
    }

    self.append(event.clone()).await?;

    match event {
      HistoryEvent::ActivityFailed { failure, .. } => warn!(
        event = "activity_failed",
        instance_id = %self.instance_id,
        seq,
        activity = %activity,
        error = %failure,
        "activity failed"
      ),
      _ => info!(
        event = "activity_completed",
        instance_id = %self.instance_id,
        seq,
        activity = %activity,
        "activity completed"
      ),
    }
    Ok(())
  }

  fn has_outcome(&self, seq: u64) -> bool {
    self.history.iter().any(|e| match e {
      HistoryEvent::ActivityCompleted { seq: s, .. } | HistoryEvent::ActivityFailed { seq: s, .. } => {
        *s == seq
      }
      _ => false,
    })
  }

  async fn raise(&mut self, name: String, data: serde_json::Value) -> Result<(), EngineError> {
    self.ensure_open().await?;
    self
      .append(HistoryEvent::EventRaised {
        name: name.clone(),
        data,
      })
      .await?;
    info!(
      event = "event_raised",
      instance_id = %self.instance_id,
      name = %name,
      "event raised"
    );
    Ok(())
  }

  async fn terminate(&mut self, reason: String) -> Result<(), EngineError> {
    self.ensure_open().await?;
    self
      .append(HistoryEvent::WorkflowTerminated {
        reason: reason.clone(),
      })
      .await?;
    warn!(
      event = "workflow_terminated",
      instance_id = %self.instance_id,
      reason = %reason,
      in_flight = self.in_flight.len(),
      "workflow terminated"
    );
    self.settle(InstanceStatus::Terminated, None).await?;
    Ok(())
  }

  /// Fail unless the instance can still accept events.
  async fn ensure_open(&mut self) -> Result<(), EngineError> {
    match self.catch_up().await {
      Err(e) if !self.halted => return Err(e.into()),
      _ => {}
    }

    let status = if self.halted {
      Some(InstanceStatus::Failed)
    } else {
      self.history.iter().find_map(|e| match e {
        HistoryEvent::WorkflowCompleted { .. } => Some(InstanceStatus::Completed),
        HistoryEvent::WorkflowFailed { .. } => Some(InstanceStatus::Failed),
        HistoryEvent::WorkflowTerminated { .. } => Some(InstanceStatus::Terminated),
        _ => None,
      })
    };

    match status {
      Some(status) => {
        // The record was settled by an earlier worker.
        if !self.halted {
          self.status = status;
        }
        Err(EngineError::InstanceTerminal {
          instance_id: self.instance_id.clone(),
          status,
        })
      }
      None => Ok(()),
    }
  }

  /// Stop the instance after its history could not be replayed.
  async fn halt(&mut self, err: ReplayError) -> Result<(), counter_store::Error> {
    if !self.halted {
      match &err {
        ReplayError::NonDeterminismDetected { .. } => error!(
          event = "non_determinism_detected",
          instance_id = %self.instance_id,
          error = %err,
          "instance halted"
        ),
        ReplayError::CorruptHistory { .. } => error!(
          instance_id = %self.instance_id,
          error = %err,
          "instance halted"
        ),
      }
    }
    self.halted = true;
    let message = err.to_string();
    self.settle(InstanceStatus::Failed, Some(&message)).await
  }

  /// Bring the instance record in line with `status`.
  async fn settle(
    &mut self,
    status: InstanceStatus,
    last_error: Option<&str>,
  ) -> Result<(), counter_store::Error> {
    if self.status == status {
      return Ok(());
    }

    self
      .shared
      .store
      .update_instance_status(&self.instance_id, status, last_error)
      .await?;
    self.status = status;
    self.shared.publish(&self.instance_id, status);

    if status == InstanceStatus::Failed {
      self.shared.mark_order_failed(&self.instance_id).await;
    }
    Ok(())
  }

  async fn append(&mut self, event: HistoryEvent) -> Result<(), counter_store::Error> {
    let position = self.shared.store.append(&self.instance_id, &event).await?;
    if position == self.history.len() as u64 {
      self.history.push(event);
      Ok(())
    } else {
      self.catch_up().await
    }
  }

  /// Read events committed since the last read.
  ///
  /// An event that cannot be decoded halts the instance before the error is
  /// returned.
  async fn catch_up(&mut self) -> Result<(), counter_store::Error> {
    let records = match self
      .shared
      .store
      .read_from(&self.instance_id, self.history.len() as u64)
      .await
    {
      Ok(records) => records,
      Err(counter_store::Error::Corrupt { position, reason }) => {
        self
          .halt(ReplayError::CorruptHistory {
            position,
            reason: reason.clone(),
          })
          .await?;
        return Err(counter_store::Error::Corrupt { position, reason });
      }
      Err(e) => return Err(e),
    };
    self.history.extend(records.into_iter().map(|r| r.event));
    Ok(())
  }
}
