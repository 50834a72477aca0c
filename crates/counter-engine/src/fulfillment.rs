//! The order-fulfillment workflow.

use counter_activity::{AddOrderInput, NotifyInput, OrderRef};
use counter_order::{Order, PlaceOrder};
use counter_workflow::ActivityKind;
use serde::{Deserialize, Serialize};

use crate::context::{Instruction, StepOutcome, WorkflowContext, WorkflowDefinition};
use crate::replay::{Replay, ReplayStatus};

/// Activities called by the fulfillment workflow, in order.
pub const FULFILLMENT_STEPS: [ActivityKind; 4] = [
  ActivityKind::AddOrder,
  ActivityKind::BaristaUpdateOrder,
  ActivityKind::KitchenUpdateOrder,
  ActivityKind::Notify,
];

/// Adds the order, updates the barista then the kitchen station, and
/// notifies the customer. Each call waits for the previous one; the first
/// failure ends the workflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderFulfillment;

impl OrderFulfillment {
  fn input_for(
    &self,
    activity: ActivityKind,
    ctx: &WorkflowContext,
  ) -> Result<serde_json::Value, String> {
    let order_id = Order::id_for_instance(ctx.instance_id());

    let input = match activity {
      ActivityKind::AddOrder => {
        let order: PlaceOrder = serde_json::from_value(ctx.input().clone())
          .map_err(|e| format!("invalid order payload: {e}"))?;
        serde_json::to_value(AddOrderInput { order_id, order })
      }
      ActivityKind::BaristaUpdateOrder | ActivityKind::KitchenUpdateOrder => {
        serde_json::to_value(OrderRef { order_id })
      }
      ActivityKind::Notify => serde_json::to_value(NotifyInput {
        order_id,
        message: format!("Order {order_id} is ready for pickup"),
      }),
    };

    input.map_err(|e| e.to_string())
  }
}

impl WorkflowDefinition for OrderFulfillment {
  fn name(&self) -> &str {
    "order-fulfillment"
  }

  fn decide(&self, ctx: &WorkflowContext) -> Instruction {
    if let Some((step, failure)) = ctx.first_failure() {
      return Instruction::Fail {
        error: format!("{} {failure}", step.activity),
      };
    }

    if ctx.steps().iter().any(|step| step.is_pending()) {
      return Instruction::AwaitCompletion;
    }

    match FULFILLMENT_STEPS.get(ctx.steps().len()) {
      Some(&activity) => match self.input_for(activity, ctx) {
        Ok(input) => Instruction::ScheduleActivity { activity, input },
        Err(error) => Instruction::Fail { error },
      },
      None => Instruction::Complete {
        output: ctx
          .output_of(ActivityKind::Notify)
          .cloned()
          .unwrap_or(serde_json::Value::Null),
      },
    }
  }
}

/// How far an order-fulfillment instance has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStage {
  Started,
  OrderAdded,
  BaristaUpdated,
  KitchenUpdated,
  Notified,
  Completed,
  Failed,
  Terminated,
}

impl FulfillmentStage {
  pub fn from_replay(replay: &Replay) -> Self {
    match replay.status {
      ReplayStatus::Completed { .. } => return FulfillmentStage::Completed,
      ReplayStatus::Failed { .. } => return FulfillmentStage::Failed,
      ReplayStatus::Terminated { .. } => return FulfillmentStage::Terminated,
      ReplayStatus::Running => {}
    }

    replay
      .context
      .steps()
      .iter()
      .take_while(|step| matches!(step.outcome, StepOutcome::Succeeded(_)))
      .last()
      .map_or(FulfillmentStage::Started, |step| match step.activity {
        ActivityKind::AddOrder => FulfillmentStage::OrderAdded,
        ActivityKind::BaristaUpdateOrder => FulfillmentStage::BaristaUpdated,
        ActivityKind::KitchenUpdateOrder => FulfillmentStage::KitchenUpdated,
        ActivityKind::Notify => FulfillmentStage::Notified,
      })
  }
}
