// storefront/src/ledger/mod.rs

//! Durable storage for orders, line items, payments, subscriptions, EMI plans
//! and processor customers.
//!
//! Every writer goes through [`LedgerStore`]. Cross-entity consistency is the
//! store's job: compound operations run in one transaction and conditional
//! updates are expressed as compare-and-set statements, so callers never hold
//! in-process locks around store calls.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
  BillingCustomer, BillingPeriod, EmiPlan, Order, OrderStatus, OrderWithItems, Payment, PaymentStatus, Subscription,
  SubscriptionStatus, UnmatchedPaymentEvent,
};

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;

#[derive(Debug, Error)]
pub enum LedgerError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("not found: {0}")]
  NotFound(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLineItem {
  pub product_id: String,
  pub quantity: i32,
  pub unit_price: i64,
}

#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
  pub external_id: String,
  pub amount: i64,
  pub currency: String,
  pub status: PaymentStatus,
}

/// Subscription to attach to a new order. Created as `incomplete` when the
/// ledger has not seen it yet.
#[derive(Debug, Clone)]
pub struct SubscriptionLink {
  pub external_id: String,
  pub period: BillingPeriod,
}

/// Input of [`LedgerStore::record_order_atomic`].
#[derive(Debug, Clone)]
pub struct NewOrder {
  pub user_id: Uuid,
  pub total_amount: i64,
  pub currency: String,
  pub items: Vec<NewLineItem>,
  pub payment: Option<NewPaymentRecord>,
  pub subscription: Option<SubscriptionLink>,
  /// Plan in the awaiting-first-payment state that this order activates.
  pub emi_plan_id: Option<Uuid>,
}

impl NewOrder {
  /// Order status implied by the payment being recorded.
  pub fn initial_status(payment_status: Option<PaymentStatus>) -> OrderStatus {
    match payment_status {
      Some(PaymentStatus::Succeeded) => OrderStatus::Paid,
      Some(PaymentStatus::Failed) => OrderStatus::Canceled,
      _ => OrderStatus::Pending,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
  Created { order_id: Uuid },
  /// The payment id was already recorded; nothing was written.
  Duplicate { order_id: Uuid },
}

impl RecordOutcome {
  pub fn order_id(&self) -> Uuid {
    match self {
      RecordOutcome::Created { order_id } | RecordOutcome::Duplicate { order_id } => *order_id,
    }
  }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
  pub external_id: String,
  pub amount: i64,
  pub currency: String,
  pub status: PaymentStatus,
  pub user_id: Uuid,
  pub order_id: Option<Uuid>,
  pub emi_plan_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub enum PaymentUpdate {
  Applied(Payment),
  /// Payment already settled; the stored row is returned untouched.
  Unchanged(Payment),
  NotFound,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
  pub external_id: String,
  pub user_id: Uuid,
  pub period: BillingPeriod,
  pub status: SubscriptionStatus,
  pub order_id: Option<Uuid>,
  pub current_period_end: Option<DateTime<Utc>>,
  pub observed_at: DateTime<Utc>,
}

/// A subscription state reported by the processor at `observed_at`.
#[derive(Debug, Clone)]
pub struct SubscriptionObservation {
  pub external_id: String,
  pub status: SubscriptionStatus,
  pub current_period_end: Option<DateTime<Utc>>,
  pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SubscriptionUpdate {
  Applied(Subscription),
  /// Stale observation or terminal subscription.
  Ignored(Subscription),
  NotFound,
}

#[derive(Debug, Clone)]
pub struct NewEmiPlan {
  pub id: Uuid,
  pub user_id: Uuid,
  pub customer_id: String,
  pub currency: String,
  pub total_amount: i64,
  pub installment_amount: i64,
  pub installment_count: i32,
  pub first_intent_id: String,
}

/// An accepted off-session installment charge. Applied only while the plan
/// still has `expected_remaining` installments left and nothing awaits
/// settlement. A succeeded payment counts the installment; a pending one is
/// parked on the plan until its webhook arrives.
#[derive(Debug, Clone)]
pub struct InstallmentCharge {
  pub plan_id: Uuid,
  pub expected_remaining: i32,
  pub payment: NewPayment,
  pub charged_at: DateTime<Utc>,
}

/// A declined installment charge. Bumps the plan's attempt counter so the
/// retry uses a fresh idempotency key.
#[derive(Debug, Clone)]
pub struct InstallmentFailure {
  pub plan_id: Uuid,
  pub expected_remaining: i32,
  pub payment: NewPayment,
}

#[derive(Debug, Clone)]
pub enum InstallmentUpdate {
  Applied(EmiPlan),
  /// Another charge for this installment won the race.
  Stale,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
  /// Writes the order, its items, the payment, and the subscription link or
  /// EMI activation in one transaction. A payment id that is already recorded
  /// yields [`RecordOutcome::Duplicate`] with the first order's id.
  async fn record_order_atomic(&self, order: NewOrder) -> LedgerResult<RecordOutcome>;

  async fn get_order(&self, order_id: Uuid) -> LedgerResult<Option<OrderWithItems>>;
  async fn list_orders_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<OrderWithItems>>;
  async fn list_all_orders(&self, limit: i64) -> LedgerResult<Vec<OrderWithItems>>;

  /// Moves an order along its transition table. Re-applying the current
  /// status is a no-op; an illegal move is [`LedgerError::Conflict`].
  async fn transition_order_status(&self, order_id: Uuid, next: OrderStatus) -> LedgerResult<Order>;

  async fn find_payment_by_external_id(&self, external_id: &str) -> LedgerResult<Option<Payment>>;

  /// Settles a pending payment and moves its order: succeeded marks a pending
  /// order paid, failed cancels a pending order. An installment payment parked
  /// on its EMI plan is settled there too (see [`EmiPlan::settle_installment`]).
  async fn apply_payment_status(&self, external_id: &str, status: PaymentStatus) -> LedgerResult<PaymentUpdate>;

  /// Keeps the first notification per external id.
  async fn record_unmatched_payment(&self, event: UnmatchedPaymentEvent) -> LedgerResult<()>;

  /// Insert-if-absent by external id; returns the stored row either way.
  async fn insert_subscription(&self, subscription: NewSubscription) -> LedgerResult<Subscription>;
  async fn find_subscription_by_external_id(&self, external_id: &str) -> LedgerResult<Option<Subscription>>;
  async fn list_subscriptions_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Subscription>>;

  /// Last-writer-wins by `observed_at`; canceled is never left.
  async fn apply_subscription_observation(&self, observation: SubscriptionObservation)
    -> LedgerResult<SubscriptionUpdate>;

  async fn insert_emi_plan(&self, plan: NewEmiPlan) -> LedgerResult<EmiPlan>;
  async fn get_emi_plan(&self, plan_id: Uuid) -> LedgerResult<Option<EmiPlan>>;

  /// Activated plans that still owe installments.
  async fn list_chargeable_emi_plans(&self) -> LedgerResult<Vec<EmiPlan>>;

  /// Inserts the payment and applies it to the plan (compare-and-set on
  /// `expected_remaining`), clearing any block.
  async fn record_installment_charge(&self, charge: InstallmentCharge) -> LedgerResult<InstallmentUpdate>;

  /// Inserts the failed payment and counts the attempt. A payment id that is
  /// already recorded is a no-op.
  async fn record_installment_failure(&self, failure: InstallmentFailure) -> LedgerResult<()>;

  async fn set_emi_plan_blocked(&self, plan_id: Uuid, reason: Option<String>) -> LedgerResult<()>;

  async fn find_customer(&self, user_id: Uuid) -> LedgerResult<Option<BillingCustomer>>;
  async fn find_customer_by_customer_id(&self, customer_id: &str) -> LedgerResult<Option<BillingCustomer>>;

  /// Insert-if-absent; returns the customer id linked to the user afterwards,
  /// which is the caller's only when it won the race.
  async fn link_customer(&self, user_id: Uuid, customer_id: &str) -> LedgerResult<String>;

  async fn is_event_processed(&self, event_id: &str) -> LedgerResult<bool>;

  /// Returns `false` when the event id was already recorded.
  async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> LedgerResult<bool>;
}
