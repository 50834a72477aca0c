use crate::order::OrderStatus;

/// Errors raised by order validation and status transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
  #[error("order has no items")]
  EmptyOrder,

  #[error("item '{item_id}' has invalid quantity {qty}")]
  InvalidQuantity { item_id: String, qty: u32 },

  #[error("invalid status transition: {from} -> {to}")]
  InvalidTransition { from: OrderStatus, to: OrderStatus },
}
