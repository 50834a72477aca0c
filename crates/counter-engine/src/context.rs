//! The instruction set workflow definitions are written against.

use counter_workflow::{ActivityFailure, ActivityKind};

/// Outcome of an activity call as seen by the workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
  Pending,
  Succeeded(serde_json::Value),
  Failed(ActivityFailure),
}

/// One activity call made by the workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
  pub seq: u64,
  pub activity: ActivityKind,
  pub input: serde_json::Value,
  pub outcome: StepOutcome,
}

impl Step {
  pub fn is_pending(&self) -> bool {
    matches!(self.outcome, StepOutcome::Pending)
  }
}

/// An out-of-band signal delivered to the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
  pub name: String,
  pub data: serde_json::Value,
}

/// Everything a workflow definition may base its decisions on.
///
/// The context is rebuilt from history on every decision cycle; it holds no
/// clock, randomness or I/O handle.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowContext {
  instance_id: String,
  input: serde_json::Value,
  steps: Vec<Step>,
  signals: Vec<Signal>,
}

impl WorkflowContext {
  pub(crate) fn new(instance_id: impl Into<String>, input: serde_json::Value) -> Self {
    Self {
      instance_id: instance_id.into(),
      input,
      steps: Vec::new(),
      signals: Vec::new(),
    }
  }

  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  pub fn input(&self) -> &serde_json::Value {
    &self.input
  }

  /// Activity calls in scheduling order; `steps()[n].seq == n`.
  pub fn steps(&self) -> &[Step] {
    &self.steps
  }

  pub fn signals(&self) -> &[Signal] {
    &self.signals
  }

  /// The first call that failed, if any.
  pub fn first_failure(&self) -> Option<(&Step, &ActivityFailure)> {
    self.steps.iter().find_map(|step| match &step.outcome {
      StepOutcome::Failed(failure) => Some((step, failure)),
      _ => None,
    })
  }

  /// Output of the most recent successful call of `activity`.
  pub fn output_of(&self, activity: ActivityKind) -> Option<&serde_json::Value> {
    self
      .steps
      .iter()
      .rev()
      .filter(|step| step.activity == activity)
      .find_map(|step| match &step.outcome {
        StepOutcome::Succeeded(output) => Some(output),
        _ => None,
      })
  }

  pub(crate) fn next_seq(&self) -> u64 {
    self.steps.len() as u64
  }

  pub(crate) fn push_step(&mut self, activity: ActivityKind, input: serde_json::Value) -> u64 {
    let seq = self.next_seq();
    self.steps.push(Step {
      seq,
      activity,
      input,
      outcome: StepOutcome::Pending,
    });
    seq
  }

  pub(crate) fn step_mut(&mut self, seq: u64) -> Option<&mut Step> {
    usize::try_from(seq)
      .ok()
      .and_then(|index| self.steps.get_mut(index))
  }

  pub(crate) fn push_signal(&mut self, name: String, data: serde_json::Value) {
    self.signals.push(Signal { name, data });
  }
}

/// A decision made by a workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
  /// Call an activity. The call gets the next scheduling position.
  ScheduleActivity {
    activity: ActivityKind,
    input: serde_json::Value,
  },
  /// Nothing to do until an outstanding call or signal arrives.
  AwaitCompletion,
  /// Finish successfully.
  Complete { output: serde_json::Value },
  /// Finish unsuccessfully.
  Fail { error: String },
}

impl Instruction {
  pub(crate) fn describe(&self) -> String {
    match self {
      Instruction::ScheduleActivity { activity, input } => format!("schedule {activity}({input})"),
      Instruction::AwaitCompletion => "await completion".to_string(),
      Instruction::Complete { output } => format!("complete({output})"),
      Instruction::Fail { error } => format!("fail({error})"),
    }
  }
}

/// Orchestration logic, written as a pure function from context to the
/// next instruction.
///
/// `decide` must return the same instruction for the same context. It is
/// called repeatedly while history is replayed, and the engine rejects a
/// history whose recorded calls disagree with what `decide` returns.
pub trait WorkflowDefinition: Send + Sync {
  fn name(&self) -> &str;

  fn decide(&self, ctx: &WorkflowContext) -> Instruction;
}
