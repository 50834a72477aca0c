//! Deterministic replay of a workflow history.
//!
//! [`replay`] walks the history in order. A recorded `ActivityScheduled`
//! event is never re-executed: the definition is asked what it would do at
//! that point and the answer must match the recorded call, after which the
//! recorded outcome (if any) becomes the call's return value. At the end of
//! the history the definition runs forward and its new decisions become the
//! next actions.

use counter_workflow::{ActivityKind, HistoryEvent};

use crate::context::{Instruction, StepOutcome, WorkflowContext, WorkflowDefinition};
use crate::error::ReplayError;

/// State of the workflow at the end of the history.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStatus {
  Running,
  Completed { output: serde_json::Value },
  Failed { error: String },
  Terminated { reason: String },
}

impl ReplayStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, ReplayStatus::Running)
  }
}

/// Work the coordinator must record and carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
  ScheduleActivity {
    seq: u64,
    activity: ActivityKind,
    input: serde_json::Value,
  },
  CompleteWorkflow {
    output: serde_json::Value,
  },
  FailWorkflow {
    error: String,
  },
}

/// A recorded call that has no outcome yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
  pub seq: u64,
  pub activity: ActivityKind,
  pub input: serde_json::Value,
}

/// Result of replaying a history.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
  /// Context reconstructed from the recorded events only.
  pub context: WorkflowContext,
  pub status: ReplayStatus,
  /// New decisions, in the order they must be appended.
  pub next_actions: Vec<NextAction>,
  /// Recorded calls still waiting for an outcome.
  pub pending: Vec<PendingCall>,
  /// Number of events consumed.
  pub position: u64,
}

/// Replay `history` against `definition`.
///
/// The same history always yields the same result.
pub fn replay(
  definition: &dyn WorkflowDefinition,
  instance_id: &str,
  history: &[HistoryEvent],
) -> Result<Replay, ReplayError> {
  let mut events = history.iter().enumerate();

  let mut ctx = match events.next() {
    Some((_, HistoryEvent::WorkflowStarted { input })) => {
      WorkflowContext::new(instance_id, input.clone())
    }
    Some((_, other)) => {
      return Err(corrupt(0, format!("history starts with {}", other.name())));
    }
    None => return Err(corrupt(0, "history is empty")),
  };
  let mut status = ReplayStatus::Running;

  for (index, event) in events {
    let position = index as u64;

    match &status {
      ReplayStatus::Running => {}
      // Late events after a termination are kept but have no effect.
      ReplayStatus::Terminated { .. } => continue,
      ReplayStatus::Completed { .. } | ReplayStatus::Failed { .. } => {
        return Err(corrupt(
          position,
          format!("{} after the workflow finished", event.name()),
        ));
      }
    }

    match event {
      HistoryEvent::WorkflowStarted { .. } => {
        return Err(corrupt(position, "workflow started twice"));
      }
      HistoryEvent::ActivityScheduled {
        seq,
        activity,
        input,
      } => {
        if *seq != ctx.next_seq() {
          return Err(corrupt(
            position,
            format!("expected seq {}, found {seq}", ctx.next_seq()),
          ));
        }

        let requested = definition.decide(&ctx);
        let matches = matches!(
          &requested,
          Instruction::ScheduleActivity { activity: a, input: i } if a == activity && i == input
        );
        if !matches {
          return Err(ReplayError::NonDeterminismDetected {
            position,
            recorded: format!("schedule {activity}({input})"),
            requested: requested.describe(),
          });
        }

        ctx.push_step(*activity, input.clone());
      }
      HistoryEvent::ActivityCompleted { seq, output, .. } => {
        resolve(&mut ctx, position, *seq, StepOutcome::Succeeded(output.clone()))?;
      }
      HistoryEvent::ActivityFailed { seq, failure } => {
        resolve(&mut ctx, position, *seq, StepOutcome::Failed(failure.clone()))?;
      }
      HistoryEvent::EventRaised { name, data } => {
        ctx.push_signal(name.clone(), data.clone());
      }
      HistoryEvent::WorkflowCompleted { output } => {
        let requested = definition.decide(&ctx);
        if !matches!(&requested, Instruction::Complete { output: o } if o == output) {
          return Err(ReplayError::NonDeterminismDetected {
            position,
            recorded: format!("complete({output})"),
            requested: requested.describe(),
          });
        }
        status = ReplayStatus::Completed {
          output: output.clone(),
        };
      }
      HistoryEvent::WorkflowFailed { error } => {
        let requested = definition.decide(&ctx);
        if !matches!(&requested, Instruction::Fail { error: e } if e == error) {
          return Err(ReplayError::NonDeterminismDetected {
            position,
            recorded: format!("fail({error})"),
            requested: requested.describe(),
          });
        }
        status = ReplayStatus::Failed {
          error: error.clone(),
        };
      }
      HistoryEvent::WorkflowTerminated { reason } => {
        status = ReplayStatus::Terminated {
          reason: reason.clone(),
        };
      }
    }
  }

  let pending = match status {
    ReplayStatus::Running => ctx
      .steps()
      .iter()
      .filter(|step| step.is_pending())
      .map(|step| PendingCall {
        seq: step.seq,
        activity: step.activity,
        input: step.input.clone(),
      })
      .collect(),
    _ => Vec::new(),
  };

  let next_actions = if status.is_terminal() {
    Vec::new()
  } else {
    run_forward(definition, &ctx)
  };

  Ok(Replay {
    context: ctx,
    status,
    next_actions,
    pending,
    position: history.len() as u64,
  })
}

/// Ask the definition for decisions until it has to wait or finishes.
fn run_forward(definition: &dyn WorkflowDefinition, recorded: &WorkflowContext) -> Vec<NextAction> {
  let mut ctx = recorded.clone();
  let mut actions = Vec::new();

  loop {
    match definition.decide(&ctx) {
      Instruction::ScheduleActivity { activity, input } => {
        let seq = ctx.push_step(activity, input.clone());
        actions.push(NextAction::ScheduleActivity {
          seq,
          activity,
          input,
        });
      }
      Instruction::AwaitCompletion => break,
      Instruction::Complete { output } => {
        actions.push(NextAction::CompleteWorkflow { output });
        break;
      }
      Instruction::Fail { error } => {
        actions.push(NextAction::FailWorkflow { error });
        break;
      }
    }
  }

  actions
}

fn resolve(
  ctx: &mut WorkflowContext,
  position: u64,
  seq: u64,
  outcome: StepOutcome,
) -> Result<(), ReplayError> {
  let Some(step) = ctx.step_mut(seq) else {
    return Err(corrupt(position, format!("outcome for unscheduled seq {seq}")));
  };
  if !step.is_pending() {
    return Err(corrupt(position, format!("second outcome for seq {seq}")));
  }
  step.outcome = outcome;
  Ok(())
}

fn corrupt(position: u64, reason: impl Into<String>) -> ReplayError {
  ReplayError::CorruptHistory {
    position,
    reason: reason.into(),
  }
}
