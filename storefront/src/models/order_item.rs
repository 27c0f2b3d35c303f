// storefront/src/models/order_item.rs

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A purchased line. `unit_price` is the price at purchase time, never a live catalog price.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
  pub id: Uuid,
  pub order_id: Uuid,
  pub product_id: String,
  pub quantity: i32,
  pub unit_price: i64,
}

impl OrderItem {
  pub fn line_total(&self) -> i64 {
    self.unit_price * i64::from(self.quantity)
  }
}
