// storefront/src/models/subscription.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "subscription_status_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
  Incomplete,
  Active,
  PastDue,
  Canceled,
}

impl SubscriptionStatus {
  /// Maps a processor status string onto the ledger's smaller status set.
  /// Unknown statuses return `None` and are ignored by callers.
  pub fn from_processor(raw: &str) -> Option<Self> {
    match raw {
      "incomplete" => Some(SubscriptionStatus::Incomplete),
      "active" | "trialing" => Some(SubscriptionStatus::Active),
      "past_due" | "unpaid" | "paused" => Some(SubscriptionStatus::PastDue),
      "canceled" | "incomplete_expired" => Some(SubscriptionStatus::Canceled),
      _ => None,
    }
  }

  pub fn is_terminal(self) -> bool {
    self == SubscriptionStatus::Canceled
  }

  pub fn as_str(self) -> &'static str {
    match self {
      SubscriptionStatus::Incomplete => "incomplete",
      SubscriptionStatus::Active => "active",
      SubscriptionStatus::PastDue => "past_due",
      SubscriptionStatus::Canceled => "canceled",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "billing_period_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
  Monthly,
  Yearly,
}

impl FromStr for BillingPeriod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "monthly" | "month" => Ok(BillingPeriod::Monthly),
      "yearly" | "year" | "annual" => Ok(BillingPeriod::Yearly),
      other => Err(format!("unknown billing period '{}'", other)),
    }
  }
}

/// Ordering stamp for subscription rows written from our own requests. It is
/// older than any processor event, so only processor observations compete
/// under last-writer-wins.
pub fn local_observation_time() -> DateTime<Utc> {
  DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
  pub id: Uuid,
  pub external_id: String,
  pub user_id: Uuid,
  pub period: BillingPeriod,
  pub status: SubscriptionStatus,
  pub order_id: Option<Uuid>,
  pub current_period_end: Option<DateTime<Utc>>,
  /// Processor timestamp of the event that set `status`. Older events never overwrite it.
  pub status_updated_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

impl Subscription {
  /// Whether a status observed at `observed_at` may replace the current one.
  ///
  /// Canceled is terminal. Otherwise the newer observation wins, and an
  /// observation with the same timestamp is re-applied so replays converge.
  pub fn accepts_update(&self, observed_at: DateTime<Utc>) -> bool {
    !self.status.is_terminal() && observed_at >= self.status_updated_at
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn subscription(status: SubscriptionStatus, updated_at: DateTime<Utc>) -> Subscription {
    Subscription {
      id: Uuid::new_v4(),
      external_id: "sub_1".to_string(),
      user_id: Uuid::new_v4(),
      period: BillingPeriod::Monthly,
      status,
      order_id: None,
      current_period_end: None,
      status_updated_at: updated_at,
      created_at: updated_at,
    }
  }

  #[test]
  fn processor_statuses_collapse_onto_ledger_statuses() {
    assert_eq!(SubscriptionStatus::from_processor("trialing"), Some(SubscriptionStatus::Active));
    assert_eq!(SubscriptionStatus::from_processor("unpaid"), Some(SubscriptionStatus::PastDue));
    assert_eq!(
      SubscriptionStatus::from_processor("incomplete_expired"),
      Some(SubscriptionStatus::Canceled)
    );
    assert_eq!(SubscriptionStatus::from_processor("something_new"), None);
  }

  #[test]
  fn stale_and_post_cancel_updates_are_rejected() {
    let now = Utc::now();
    let active = subscription(SubscriptionStatus::Active, now);
    assert!(active.accepts_update(now));
    assert!(active.accepts_update(now + Duration::seconds(5)));
    assert!(!active.accepts_update(now - Duration::seconds(5)));

    let canceled = subscription(SubscriptionStatus::Canceled, now);
    assert!(!canceled.accepts_update(now + Duration::days(1)));
  }

  #[test]
  fn locally_created_rows_lose_to_any_processor_event() {
    let local = subscription(SubscriptionStatus::Incomplete, local_observation_time());
    assert!(local.accepts_update(Utc::now() - Duration::days(365)));
  }
}
