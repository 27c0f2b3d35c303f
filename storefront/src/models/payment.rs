// storefront/src/models/payment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_status_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
  Pending,
  Succeeded,
  Failed,
}

impl PaymentStatus {
  /// Settled payments never change again; only `pending` moves.
  pub fn can_become(self, next: PaymentStatus) -> bool {
    self == PaymentStatus::Pending && next != PaymentStatus::Pending
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PaymentStatus::Pending => "pending",
      PaymentStatus::Succeeded => "succeeded",
      PaymentStatus::Failed => "failed",
    }
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
  pub id: Uuid,
  /// Processor payment identifier. Unique across the table.
  pub external_id: String,
  pub amount: i64,
  pub currency: String,
  pub status: PaymentStatus,
  pub user_id: Uuid,
  pub order_id: Option<Uuid>,
  pub emi_plan_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// A processor payment notification that arrived before checkout recorded the payment.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UnmatchedPaymentEvent {
  pub external_id: String,
  pub status: PaymentStatus,
  pub amount: Option<i64>,
  pub currency: Option<String>,
  pub event_id: String,
  pub received_at: DateTime<Utc>,
}
