// storefront/src/models/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::OrderItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_status_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  Pending,
  Paid,
  Shipped,
  Delivered,
  Canceled,
}

impl OrderStatus {
  /// pending -> paid -> shipped -> delivered, with canceled reachable from pending or paid.
  pub fn can_transition_to(self, next: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
      (self, next),
      (Pending, Paid) | (Pending, Canceled) | (Paid, Shipped) | (Paid, Canceled) | (Shipped, Delivered)
    )
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, OrderStatus::Delivered | OrderStatus::Canceled)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      OrderStatus::Pending => "pending",
      OrderStatus::Paid => "paid",
      OrderStatus::Shipped => "shipped",
      OrderStatus::Delivered => "delivered",
      OrderStatus::Canceled => "canceled",
    }
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OrderStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(OrderStatus::Pending),
      "paid" => Ok(OrderStatus::Paid),
      "shipped" => Ok(OrderStatus::Shipped),
      "delivered" => Ok(OrderStatus::Delivered),
      "canceled" | "cancelled" => Ok(OrderStatus::Canceled),
      other => Err(format!("unknown order status '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  pub id: Uuid,
  pub user_id: Uuid,
  pub total_amount: i64,
  pub currency: String,
  pub status: OrderStatus,
  pub subscription_id: Option<Uuid>,
  pub emi_plan_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithItems {
  #[serde(flatten)]
  pub order: Order,
  pub items: Vec<OrderItem>,
}

#[cfg(test)]
mod tests {
  use super::OrderStatus::*;
  use super::*;

  #[test]
  fn forward_transitions_follow_fulfilment_order() {
    assert!(Pending.can_transition_to(Paid));
    assert!(Paid.can_transition_to(Shipped));
    assert!(Shipped.can_transition_to(Delivered));
    assert!(!Pending.can_transition_to(Shipped));
    assert!(!Delivered.can_transition_to(Paid));
    assert!(!Paid.can_transition_to(Pending));
  }

  #[test]
  fn cancellation_only_before_shipping() {
    assert!(Pending.can_transition_to(Canceled));
    assert!(Paid.can_transition_to(Canceled));
    assert!(!Shipped.can_transition_to(Canceled));
    assert!(!Delivered.can_transition_to(Canceled));
    for next in [Pending, Paid, Shipped, Delivered] {
      assert!(!Canceled.can_transition_to(next));
    }
  }

  #[test]
  fn parses_both_spellings_of_canceled() {
    assert_eq!("cancelled".parse::<OrderStatus>().unwrap(), Canceled);
    assert_eq!("canceled".parse::<OrderStatus>().unwrap(), Canceled);
    assert!("refunded".parse::<OrderStatus>().is_err());
  }
}
