use std::fmt;

use serde::{Deserialize, Serialize};

/// The activities known to the order-fulfillment workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActivityKind {
  AddOrder,
  BaristaUpdateOrder,
  KitchenUpdateOrder,
  Notify,
}

impl ActivityKind {
  pub const ALL: [ActivityKind; 4] = [
    ActivityKind::AddOrder,
    ActivityKind::BaristaUpdateOrder,
    ActivityKind::KitchenUpdateOrder,
    ActivityKind::Notify,
  ];

  pub fn name(self) -> &'static str {
    match self {
      ActivityKind::AddOrder => "AddOrder",
      ActivityKind::BaristaUpdateOrder => "BaristaUpdateOrder",
      ActivityKind::KitchenUpdateOrder => "KitchenUpdateOrder",
      ActivityKind::Notify => "Notify",
    }
  }
}

impl fmt::Display for ActivityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}
