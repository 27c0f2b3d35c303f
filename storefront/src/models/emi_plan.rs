// storefront/src/models/emi_plan.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

use super::PaymentStatus;

/// A fixed-count installment schedule.
///
/// A plan is created in the awaiting-first-payment state (`activated_at` unset)
/// and is activated by the checkout that records its first installment.
/// An installment counts as paid only once its payment has succeeded; a
/// payment still processing is parked in `pending_payment_id` until the
/// processor settles it.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmiPlan {
  pub id: Uuid,
  pub user_id: Uuid,
  pub customer_id: String,
  pub currency: String,
  pub total_amount: i64,
  pub installment_amount: i64,
  pub installment_count: i32,
  pub installments_remaining: i32,
  pub first_intent_id: String,
  pub order_id: Option<Uuid>,
  pub activated_at: Option<DateTime<Utc>>,
  pub last_charged_at: Option<DateTime<Utc>>,
  pub completed: bool,
  pub blocked_reason: Option<String>,
  /// Installment payment awaiting settlement. No further charge is made while set.
  pub pending_payment_id: Option<String>,
  /// Failed attempts at the current installment; part of the idempotency key.
  pub failed_attempts: i32,
  pub created_at: DateTime<Utc>,
}

/// `total / months`, rounded half up. Returns `None` for a non-positive month
/// count, a negative total, or a total too large to round.
pub fn installment_amount(total: i64, months: i32) -> Option<i64> {
  if months <= 0 || total < 0 {
    return None;
  }
  let months = i64::from(months);
  total.checked_add(months / 2).map(|rounded| rounded / months)
}

impl EmiPlan {
  pub fn is_active(&self) -> bool {
    self.activated_at.is_some()
  }

  pub fn is_blocked(&self) -> bool {
    self.blocked_reason.is_some()
  }

  /// 1-based number of the next installment to be charged.
  pub fn next_installment_number(&self) -> i32 {
    self.installment_count - self.installments_remaining + 1
  }

  /// True when the first installment was never paid.
  pub fn awaiting_first_installment(&self) -> bool {
    self.installments_remaining == self.installment_count
  }

  /// Records an installment payment made at `at`. Succeeded counts the
  /// installment; pending parks it until settlement.
  pub fn apply_installment(&mut self, payment_id: &str, status: PaymentStatus, at: DateTime<Utc>) {
    self.last_charged_at = Some(at);
    self.blocked_reason = None;
    match status {
      PaymentStatus::Succeeded => self.count_paid_installment(),
      PaymentStatus::Pending => self.pending_payment_id = Some(payment_id.to_string()),
      PaymentStatus::Failed => {}
    }
  }

  /// Settles the parked installment payment. Returns `false` when
  /// `payment_id` is not the one awaiting settlement.
  pub fn settle_installment(&mut self, payment_id: &str, status: PaymentStatus) -> bool {
    if self.pending_payment_id.as_deref() != Some(payment_id) {
      return false;
    }
    match status {
      PaymentStatus::Pending => return false,
      PaymentStatus::Succeeded => {
        self.pending_payment_id = None;
        self.count_paid_installment();
      }
      PaymentStatus::Failed => {
        self.pending_payment_id = None;
        self.failed_attempts += 1;
        // Unpaid installment is due again right away.
        self.last_charged_at = None;
        if self.awaiting_first_installment() {
          self.activated_at = None;
          self.order_id = None;
        }
      }
    }
    true
  }

  fn count_paid_installment(&mut self) {
    if self.installments_remaining > 0 {
      self.installments_remaining -= 1;
    }
    self.completed = self.installments_remaining == 0;
    self.failed_attempts = 0;
  }

  /// True when the plan still owes installments, nothing is awaiting
  /// settlement, and the last charge is at least `spacing` old.
  pub fn is_due(&self, now: DateTime<Utc>, spacing: Duration) -> bool {
    if !self.is_active() || self.completed || self.installments_remaining <= 0 || self.pending_payment_id.is_some() {
      return false;
    }
    match self.last_charged_at {
      None => true,
      Some(last) => match chrono::Duration::from_std(spacing) {
        Ok(spacing) => now - last >= spacing,
        Err(_) => false,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn installment_rounds_half_up() {
    assert_eq!(installment_amount(100_000, 3), Some(33_333));
    assert_eq!(installment_amount(100_000, 2500), Some(40));
    assert_eq!(installment_amount(5, 2), Some(3));
    assert_eq!(installment_amount(10, 4), Some(3));
    assert_eq!(installment_amount(1000, 0), None);
    assert_eq!(installment_amount(i64::MAX, 3), None);
    assert_eq!(installment_amount(i64::MAX, 1), Some(i64::MAX));
  }

  fn plan(now: DateTime<Utc>) -> EmiPlan {
    EmiPlan {
      id: Uuid::new_v4(),
      user_id: Uuid::new_v4(),
      customer_id: "cus_1".into(),
      currency: "inr".into(),
      total_amount: 100_000,
      installment_amount: 33_333,
      installment_count: 3,
      installments_remaining: 2,
      first_intent_id: "pi_1".into(),
      order_id: None,
      activated_at: Some(now),
      last_charged_at: Some(now - chrono::Duration::days(10)),
      completed: false,
      blocked_reason: None,
      pending_payment_id: None,
      failed_attempts: 0,
      created_at: now,
    }
  }

  #[test]
  fn due_only_after_spacing_has_elapsed() {
    let now = Utc::now();
    let mut plan = plan(now);
    let month = Duration::from_secs(30 * 24 * 3600);
    assert!(!plan.is_due(now, month));
    assert_eq!(plan.next_installment_number(), 2);

    plan.last_charged_at = Some(now - chrono::Duration::days(31));
    assert!(plan.is_due(now, month));

    plan.pending_payment_id = Some("pi_2".into());
    assert!(!plan.is_due(now, month));

    plan.pending_payment_id = None;
    plan.installments_remaining = 0;
    assert!(!plan.is_due(now, month));
  }

  #[test]
  fn pending_installment_counts_only_once_settled() {
    let now = Utc::now();
    let mut plan = plan(now);

    plan.apply_installment("pi_2", PaymentStatus::Pending, now);
    assert_eq!(plan.installments_remaining, 2);
    assert!(!plan.settle_installment("pi_other", PaymentStatus::Succeeded));

    assert!(plan.settle_installment("pi_2", PaymentStatus::Succeeded));
    assert_eq!(plan.installments_remaining, 1);
    assert!(plan.pending_payment_id.is_none());
    assert!(!plan.settle_installment("pi_2", PaymentStatus::Succeeded));
  }

  #[test]
  fn failed_settlement_makes_installment_due_again() {
    let now = Utc::now();
    let mut plan = plan(now);
    plan.apply_installment("pi_2", PaymentStatus::Pending, now);

    assert!(plan.settle_installment("pi_2", PaymentStatus::Failed));
    assert_eq!(plan.installments_remaining, 2);
    assert_eq!(plan.failed_attempts, 1);
    assert!(plan.is_active());
    assert!(plan.is_due(now, Duration::from_secs(30 * 24 * 3600)));
  }

  #[test]
  fn failed_first_installment_reopens_plan() {
    let now = Utc::now();
    let mut plan = plan(now);
    plan.installments_remaining = 3;
    plan.order_id = Some(Uuid::new_v4());
    plan.apply_installment("pi_1", PaymentStatus::Pending, now);

    assert!(plan.settle_installment("pi_1", PaymentStatus::Failed));
    assert!(!plan.is_active());
    assert!(plan.order_id.is_none());
    assert_eq!(plan.installments_remaining, 3);
  }
}
