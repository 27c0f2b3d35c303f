// storefront/src/models/customer.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Link between a local user and its processor customer. One per user, unique both ways.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BillingCustomer {
  pub user_id: Uuid,
  pub customer_id: String,
  pub created_at: DateTime<Utc>,
}
