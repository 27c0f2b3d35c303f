// storefront/src/ledger/postgres.rs

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
  InstallmentCharge, InstallmentFailure, InstallmentUpdate, LedgerError, LedgerResult, LedgerStore, NewEmiPlan,
  NewOrder, NewSubscription, PaymentUpdate, RecordOutcome, SubscriptionObservation, SubscriptionUpdate,
};
use crate::models::{
  local_observation_time, BillingCustomer, EmiPlan, Order, OrderItem, OrderStatus, OrderWithItems, Payment,
  PaymentStatus, Subscription, SubscriptionStatus, UnmatchedPaymentEvent,
};

const ORDER_COLUMNS: &str =
  "id, user_id, total_amount, currency, status, subscription_id, emi_plan_id, created_at, updated_at";
const PAYMENT_COLUMNS: &str =
  "id, external_id, amount, currency, status, user_id, order_id, emi_plan_id, created_at, updated_at";
const SUBSCRIPTION_COLUMNS: &str =
  "id, external_id, user_id, period, status, order_id, current_period_end, status_updated_at, created_at";
const EMI_COLUMNS: &str = "id, user_id, customer_id, currency, total_amount, installment_amount, installment_count, \
   installments_remaining, first_intent_id, order_id, activated_at, last_charged_at, completed, blocked_reason, \
   pending_payment_id, failed_attempts, created_at";

/// Postgres-backed ledger. Schema lives in `storefront/migrations`.
#[derive(Clone)]
pub struct PgLedger {
  pool: PgPool,
}

impl PgLedger {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn connect(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
    let pool = PgPoolOptions::new()
      .max_connections(max_connections)
      .connect(database_url)
      .await?;
    Ok(Self::new(pool))
  }

  pub async fn run_migrations(&self) -> LedgerResult<()> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    info!("Ledger migrations applied.");
    Ok(())
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }

  async fn attach_items(&self, orders: Vec<Order>) -> LedgerResult<Vec<OrderWithItems>> {
    if orders.is_empty() {
      return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let items = sqlx::query_as::<_, OrderItem>(
      "SELECT id, order_id, product_id, quantity, unit_price FROM order_items WHERE order_id = ANY($1) ORDER BY id",
    )
    .bind(&ids)
    .fetch_all(&self.pool)
    .await?;

    let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for item in items {
      by_order.entry(item.order_id).or_default().push(item);
    }
    Ok(
      orders
        .into_iter()
        .map(|order| {
          let items = by_order.remove(&order.id).unwrap_or_default();
          OrderWithItems { order, items }
        })
        .collect(),
    )
  }
}

async fn fetch_subscription_in_tx(
  tx: &mut Transaction<'static, Postgres>,
  external_id: &str,
) -> LedgerResult<Option<Subscription>> {
  let sql = format!("SELECT {} FROM subscriptions WHERE external_id = $1", SUBSCRIPTION_COLUMNS);
  Ok(
    sqlx::query_as::<_, Subscription>(&sql)
      .bind(external_id)
      .fetch_optional(&mut **tx)
      .await?,
  )
}

#[async_trait]
impl LedgerStore for PgLedger {
  #[instrument(name = "ledger::record_order_atomic", skip(self, order), fields(user_id = %order.user_id, total = order.total_amount))]
  async fn record_order_atomic(&self, order: NewOrder) -> LedgerResult<RecordOutcome> {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let mut tx = self.pool.begin().await?;

    // A notification that beat checkout here decides the payment status.
    let mut payment_status = order.payment.as_ref().map(|p| p.status);
    if let Some(payment) = &order.payment {
      let unmatched: Option<PaymentStatus> = sqlx::query_scalar(
        "DELETE FROM unmatched_payment_events WHERE external_id = $1 RETURNING status",
      )
      .bind(&payment.external_id)
      .fetch_optional(&mut *tx)
      .await?;
      if let Some(status) = unmatched {
        if payment.status.can_become(status) {
          debug!(payment_id = %payment.external_id, status = status.as_str(), "Applying early processor notification.");
          payment_status = Some(status);
        }
      }
    }

    let subscription_id = match &order.subscription {
      None => None,
      Some(link) => {
        let existing = fetch_subscription_in_tx(&mut tx, &link.external_id).await?;
        match existing {
          Some(sub) if sub.user_id != order.user_id => {
            tx.rollback().await?;
            return Err(LedgerError::Conflict(format!(
              "subscription {} belongs to another user",
              link.external_id
            )));
          }
          Some(sub) => {
            sqlx::query("UPDATE subscriptions SET order_id = COALESCE(order_id, $2) WHERE id = $1")
              .bind(sub.id)
              .bind(order_id)
              .execute(&mut *tx)
              .await?;
            Some(sub.id)
          }
          None => {
            let id: Uuid = sqlx::query_scalar(
              "INSERT INTO subscriptions (id, external_id, user_id, period, status, order_id, status_updated_at) \
               VALUES ($1, $2, $3, $4, $5, $6, $7) \
               ON CONFLICT (external_id) DO UPDATE SET order_id = COALESCE(subscriptions.order_id, EXCLUDED.order_id) \
               RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(&link.external_id)
            .bind(order.user_id)
            .bind(link.period)
            .bind(SubscriptionStatus::Incomplete)
            .bind(order_id)
            .bind(local_observation_time())
            .fetch_one(&mut *tx)
            .await?;
            Some(id)
          }
        }
      }
    };

    sqlx::query(
      "INSERT INTO orders (id, user_id, total_amount, currency, status, subscription_id, emi_plan_id, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)",
    )
    .bind(order_id)
    .bind(order.user_id)
    .bind(order.total_amount)
    .bind(&order.currency)
    .bind(NewOrder::initial_status(payment_status))
    .bind(subscription_id)
    .bind(order.emi_plan_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for item in &order.items {
      sqlx::query("INSERT INTO order_items (id, order_id, product_id, quantity, unit_price) VALUES ($1, $2, $3, $4, $5)")
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(&item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .execute(&mut *tx)
        .await?;
    }

    if let (Some(payment), Some(status)) = (&order.payment, payment_status) {
      // Unique external_id is the cross-request de-duplication point: a concurrent
      // recorder blocks here until the first commits, then inserts nothing.
      let inserted: Option<Uuid> = sqlx::query_scalar(
        "INSERT INTO payments (id, external_id, amount, currency, status, user_id, order_id, emi_plan_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
         ON CONFLICT (external_id) DO NOTHING RETURNING id",
      )
      .bind(Uuid::new_v4())
      .bind(&payment.external_id)
      .bind(payment.amount)
      .bind(&payment.currency)
      .bind(status)
      .bind(order.user_id)
      .bind(order_id)
      .bind(order.emi_plan_id)
      .bind(now)
      .fetch_optional(&mut *tx)
      .await?;

      if inserted.is_none() {
        tx.rollback().await?;
        let existing: Option<Option<Uuid>> =
          sqlx::query_scalar("SELECT order_id FROM payments WHERE external_id = $1")
            .bind(&payment.external_id)
            .fetch_optional(&self.pool)
            .await?;
        return match existing.flatten() {
          Some(existing_order) => {
            info!(payment_id = %payment.external_id, order_id = %existing_order, "Payment already recorded.");
            Ok(RecordOutcome::Duplicate { order_id: existing_order })
          }
          None => Err(LedgerError::Conflict(format!(
            "payment {} is recorded without an order",
            payment.external_id
          ))),
        };
      }
    }

    if let Some(plan_id) = order.emi_plan_id {
      // A pending first installment activates the plan but is counted only when it settles.
      let (paid, parked) = match (&order.payment, payment_status) {
        (Some(p), Some(PaymentStatus::Pending)) => (0i32, Some(p.external_id.clone())),
        (_, Some(PaymentStatus::Failed)) => (0i32, None),
        _ => (1i32, None),
      };
      let activate = payment_status != Some(PaymentStatus::Failed);
      let activated = sqlx::query(
        "UPDATE emi_plans SET \
           activated_at = CASE WHEN $7 THEN $3 ELSE activated_at END, \
           last_charged_at = CASE WHEN $7 THEN $3 ELSE last_charged_at END, \
           order_id = CASE WHEN $7 THEN $4 ELSE order_id END, \
           installments_remaining = installments_remaining - $5, \
           completed = (installments_remaining - $5 = 0), \
           pending_payment_id = $6 \
         WHERE id = $1 AND user_id = $2 AND activated_at IS NULL AND installments_remaining > 0",
      )
      .bind(plan_id)
      .bind(order.user_id)
      .bind(now)
      .bind(order_id)
      .bind(paid)
      .bind(parked)
      .bind(activate)
      .execute(&mut *tx)
      .await?;
      if activated.rows_affected() != 1 {
        tx.rollback().await?;
        warn!(emi_plan_id = %plan_id, "EMI plan is not awaiting its first payment.");
        return Err(LedgerError::Conflict(format!(
          "EMI plan {} is not awaiting its first payment",
          plan_id
        )));
      }
    }

    tx.commit().await?;
    info!(order_id = %order_id, items = order.items.len(), "Order recorded.");
    Ok(RecordOutcome::Created { order_id })
  }

  async fn get_order(&self, order_id: Uuid) -> LedgerResult<Option<OrderWithItems>> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
    let order = sqlx::query_as::<_, Order>(&sql)
      .bind(order_id)
      .fetch_optional(&self.pool)
      .await?;
    match order {
      Some(order) => Ok(self.attach_items(vec![order]).await?.into_iter().next()),
      None => Ok(None),
    }
  }

  async fn list_orders_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<OrderWithItems>> {
    let sql = format!(
      "SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
      ORDER_COLUMNS
    );
    let orders = sqlx::query_as::<_, Order>(&sql)
      .bind(user_id)
      .fetch_all(&self.pool)
      .await?;
    self.attach_items(orders).await
  }

  async fn list_all_orders(&self, limit: i64) -> LedgerResult<Vec<OrderWithItems>> {
    let sql = format!("SELECT {} FROM orders ORDER BY created_at DESC LIMIT $1", ORDER_COLUMNS);
    let orders = sqlx::query_as::<_, Order>(&sql)
      .bind(limit)
      .fetch_all(&self.pool)
      .await?;
    self.attach_items(orders).await
  }

  #[instrument(name = "ledger::transition_order_status", skip(self), fields(order_id = %order_id, next = %next))]
  async fn transition_order_status(&self, order_id: Uuid, next: OrderStatus) -> LedgerResult<Order> {
    let mut tx = self.pool.begin().await?;
    let sql = format!("SELECT {} FROM orders WHERE id = $1 FOR UPDATE", ORDER_COLUMNS);
    let current = sqlx::query_as::<_, Order>(&sql)
      .bind(order_id)
      .fetch_optional(&mut *tx)
      .await?
      .ok_or_else(|| LedgerError::NotFound(format!("order {}", order_id)))?;

    if current.status == next {
      tx.commit().await?;
      return Ok(current);
    }
    if !current.status.can_transition_to(next) {
      tx.rollback().await?;
      return Err(LedgerError::Conflict(format!(
        "order {} cannot move from {} to {}",
        order_id, current.status, next
      )));
    }

    let sql = format!(
      "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING {}",
      ORDER_COLUMNS
    );
    let updated = sqlx::query_as::<_, Order>(&sql)
      .bind(order_id)
      .bind(next)
      .fetch_one(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(updated)
  }

  async fn find_payment_by_external_id(&self, external_id: &str) -> LedgerResult<Option<Payment>> {
    let sql = format!("SELECT {} FROM payments WHERE external_id = $1", PAYMENT_COLUMNS);
    Ok(
      sqlx::query_as::<_, Payment>(&sql)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  #[instrument(name = "ledger::apply_payment_status", skip(self), fields(status = status.as_str()))]
  async fn apply_payment_status(&self, external_id: &str, status: PaymentStatus) -> LedgerResult<PaymentUpdate> {
    let mut tx = self.pool.begin().await?;
    let sql = format!(
      "UPDATE payments SET status = $2, updated_at = now() WHERE external_id = $1 AND status = 'pending' RETURNING {}",
      PAYMENT_COLUMNS
    );
    let updated = sqlx::query_as::<_, Payment>(&sql)
      .bind(external_id)
      .bind(status)
      .fetch_optional(&mut *tx)
      .await?;

    let Some(payment) = updated else {
      tx.rollback().await?;
      return Ok(match self.find_payment_by_external_id(external_id).await? {
        Some(existing) => PaymentUpdate::Unchanged(existing),
        None => PaymentUpdate::NotFound,
      });
    };

    if let Some(order_id) = payment.order_id {
      let next = NewOrder::initial_status(Some(status));
      sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 AND status = 'pending'")
        .bind(order_id)
        .bind(next)
        .execute(&mut *tx)
        .await?;
    }
    if let Some(plan_id) = payment.emi_plan_id {
      let settle = match status {
        PaymentStatus::Succeeded => Some(
          "UPDATE emi_plans SET pending_payment_id = NULL, failed_attempts = 0, \
             installments_remaining = installments_remaining - 1, completed = (installments_remaining - 1 = 0) \
           WHERE id = $1 AND pending_payment_id = $2 AND installments_remaining > 0",
        ),
        // An unpaid first installment reopens the plan for a new checkout.
        PaymentStatus::Failed => Some(
          "UPDATE emi_plans SET pending_payment_id = NULL, failed_attempts = failed_attempts + 1, \
             last_charged_at = NULL, \
             activated_at = CASE WHEN installments_remaining = installment_count THEN NULL ELSE activated_at END, \
             order_id = CASE WHEN installments_remaining = installment_count THEN NULL ELSE order_id END \
           WHERE id = $1 AND pending_payment_id = $2",
        ),
        PaymentStatus::Pending => None,
      };
      if let Some(sql) = settle {
        let settled = sqlx::query(sql)
          .bind(plan_id)
          .bind(&payment.external_id)
          .execute(&mut *tx)
          .await?;
        if settled.rows_affected() == 1 {
          debug!(emi_plan_id = %plan_id, status = status.as_str(), "Installment payment settled.");
        }
      }
    }
    tx.commit().await?;
    Ok(PaymentUpdate::Applied(payment))
  }

  async fn record_unmatched_payment(&self, event: UnmatchedPaymentEvent) -> LedgerResult<()> {
    sqlx::query(
      "INSERT INTO unmatched_payment_events (external_id, status, amount, currency, event_id, received_at) \
       VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (external_id) DO NOTHING",
    )
    .bind(&event.external_id)
    .bind(event.status)
    .bind(event.amount)
    .bind(&event.currency)
    .bind(&event.event_id)
    .bind(event.received_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn insert_subscription(&self, sub: NewSubscription) -> LedgerResult<Subscription> {
    let sql = format!(
      "INSERT INTO subscriptions (id, external_id, user_id, period, status, order_id, current_period_end, status_updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (external_id) DO NOTHING RETURNING {}",
      SUBSCRIPTION_COLUMNS
    );
    let inserted = sqlx::query_as::<_, Subscription>(&sql)
      .bind(Uuid::new_v4())
      .bind(&sub.external_id)
      .bind(sub.user_id)
      .bind(sub.period)
      .bind(sub.status)
      .bind(sub.order_id)
      .bind(sub.current_period_end)
      .bind(sub.observed_at)
      .fetch_optional(&self.pool)
      .await?;
    match inserted {
      Some(s) => Ok(s),
      None => self
        .find_subscription_by_external_id(&sub.external_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("subscription {}", sub.external_id))),
    }
  }

  async fn find_subscription_by_external_id(&self, external_id: &str) -> LedgerResult<Option<Subscription>> {
    let sql = format!("SELECT {} FROM subscriptions WHERE external_id = $1", SUBSCRIPTION_COLUMNS);
    Ok(
      sqlx::query_as::<_, Subscription>(&sql)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn list_subscriptions_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Subscription>> {
    let sql = format!(
      "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
      SUBSCRIPTION_COLUMNS
    );
    Ok(
      sqlx::query_as::<_, Subscription>(&sql)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?,
    )
  }

  #[instrument(name = "ledger::apply_subscription_observation", skip(self, obs), fields(subscription_id = %obs.external_id, status = obs.status.as_str()))]
  async fn apply_subscription_observation(&self, obs: SubscriptionObservation) -> LedgerResult<SubscriptionUpdate> {
    let sql = format!(
      "UPDATE subscriptions SET status = $2, current_period_end = COALESCE($3, current_period_end), status_updated_at = $4 \
       WHERE external_id = $1 AND status <> 'canceled' AND status_updated_at <= $4 RETURNING {}",
      SUBSCRIPTION_COLUMNS
    );
    let updated = sqlx::query_as::<_, Subscription>(&sql)
      .bind(&obs.external_id)
      .bind(obs.status)
      .bind(obs.current_period_end)
      .bind(obs.observed_at)
      .fetch_optional(&self.pool)
      .await?;
    if let Some(sub) = updated {
      return Ok(SubscriptionUpdate::Applied(sub));
    }
    Ok(match self.find_subscription_by_external_id(&obs.external_id).await? {
      Some(existing) => SubscriptionUpdate::Ignored(existing),
      None => SubscriptionUpdate::NotFound,
    })
  }

  async fn insert_emi_plan(&self, plan: NewEmiPlan) -> LedgerResult<EmiPlan> {
    let sql = format!(
      "INSERT INTO emi_plans (id, user_id, customer_id, currency, total_amount, installment_amount, installment_count, \
       installments_remaining, first_intent_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8) RETURNING {}",
      EMI_COLUMNS
    );
    Ok(
      sqlx::query_as::<_, EmiPlan>(&sql)
        .bind(plan.id)
        .bind(plan.user_id)
        .bind(&plan.customer_id)
        .bind(&plan.currency)
        .bind(plan.total_amount)
        .bind(plan.installment_amount)
        .bind(plan.installment_count)
        .bind(&plan.first_intent_id)
        .fetch_one(&self.pool)
        .await?,
    )
  }

  async fn get_emi_plan(&self, plan_id: Uuid) -> LedgerResult<Option<EmiPlan>> {
    let sql = format!("SELECT {} FROM emi_plans WHERE id = $1", EMI_COLUMNS);
    Ok(
      sqlx::query_as::<_, EmiPlan>(&sql)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn list_chargeable_emi_plans(&self) -> LedgerResult<Vec<EmiPlan>> {
    let sql = format!(
      "SELECT {} FROM emi_plans WHERE activated_at IS NOT NULL AND installments_remaining > 0 ORDER BY created_at",
      EMI_COLUMNS
    );
    Ok(sqlx::query_as::<_, EmiPlan>(&sql).fetch_all(&self.pool).await?)
  }

  #[instrument(name = "ledger::record_installment_charge", skip(self, charge), fields(emi_plan_id = %charge.plan_id, payment_id = %charge.payment.external_id))]
  async fn record_installment_charge(&self, charge: InstallmentCharge) -> LedgerResult<InstallmentUpdate> {
    let (paid, parked) = match charge.payment.status {
      PaymentStatus::Succeeded => (1i32, None),
      PaymentStatus::Pending => (0i32, Some(charge.payment.external_id.clone())),
      PaymentStatus::Failed => {
        return Err(LedgerError::Conflict(format!(
          "payment {} failed; record it with record_installment_failure",
          charge.payment.external_id
        )))
      }
    };
    let mut tx = self.pool.begin().await?;
    let sql = format!(
      "UPDATE emi_plans SET installments_remaining = installments_remaining - $4, \
       completed = (installments_remaining - $4 = 0), last_charged_at = $3, blocked_reason = NULL, \
       pending_payment_id = $5, failed_attempts = CASE WHEN $4 = 1 THEN 0 ELSE failed_attempts END \
       WHERE id = $1 AND installments_remaining = $2 AND installments_remaining > 0 \
         AND pending_payment_id IS NULL RETURNING {}",
      EMI_COLUMNS
    );
    let updated = sqlx::query_as::<_, EmiPlan>(&sql)
      .bind(charge.plan_id)
      .bind(charge.expected_remaining)
      .bind(charge.charged_at)
      .bind(paid)
      .bind(parked)
      .fetch_optional(&mut *tx)
      .await?;
    let Some(plan) = updated else {
      tx.rollback().await?;
      return Ok(InstallmentUpdate::Stale);
    };

    let p = &charge.payment;
    let inserted: Option<Uuid> = sqlx::query_scalar(
      "INSERT INTO payments (id, external_id, amount, currency, status, user_id, order_id, emi_plan_id) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (external_id) DO NOTHING RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(&p.external_id)
    .bind(p.amount)
    .bind(&p.currency)
    .bind(p.status)
    .bind(p.user_id)
    .bind(p.order_id)
    .bind(p.emi_plan_id)
    .fetch_optional(&mut *tx)
    .await?;
    if inserted.is_none() {
      tx.rollback().await?;
      return Ok(InstallmentUpdate::Stale);
    }

    tx.commit().await?;
    Ok(InstallmentUpdate::Applied(plan))
  }

  #[instrument(name = "ledger::record_installment_failure", skip(self, failure), fields(emi_plan_id = %failure.plan_id, payment_id = %failure.payment.external_id))]
  async fn record_installment_failure(&self, failure: InstallmentFailure) -> LedgerResult<()> {
    let mut tx = self.pool.begin().await?;
    let p = &failure.payment;
    let inserted: Option<Uuid> = sqlx::query_scalar(
      "INSERT INTO payments (id, external_id, amount, currency, status, user_id, order_id, emi_plan_id) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (external_id) DO NOTHING RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(&p.external_id)
    .bind(p.amount)
    .bind(&p.currency)
    .bind(p.status)
    .bind(p.user_id)
    .bind(p.order_id)
    .bind(p.emi_plan_id)
    .fetch_optional(&mut *tx)
    .await?;
    if inserted.is_none() {
      tx.rollback().await?;
      return Ok(());
    }
    sqlx::query("UPDATE emi_plans SET failed_attempts = failed_attempts + 1 WHERE id = $1 AND installments_remaining = $2")
      .bind(failure.plan_id)
      .bind(failure.expected_remaining)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(())
  }

  async fn set_emi_plan_blocked(&self, plan_id: Uuid, reason: Option<String>) -> LedgerResult<()> {
    sqlx::query("UPDATE emi_plans SET blocked_reason = $2 WHERE id = $1")
      .bind(plan_id)
      .bind(reason)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn find_customer(&self, user_id: Uuid) -> LedgerResult<Option<BillingCustomer>> {
    Ok(
      sqlx::query_as::<_, BillingCustomer>(
        "SELECT user_id, customer_id, created_at FROM billing_customers WHERE user_id = $1",
      )
      .bind(user_id)
      .fetch_optional(&self.pool)
      .await?,
    )
  }

  async fn find_customer_by_customer_id(&self, customer_id: &str) -> LedgerResult<Option<BillingCustomer>> {
    Ok(
      sqlx::query_as::<_, BillingCustomer>(
        "SELECT user_id, customer_id, created_at FROM billing_customers WHERE customer_id = $1",
      )
      .bind(customer_id)
      .fetch_optional(&self.pool)
      .await?,
    )
  }

  async fn link_customer(&self, user_id: Uuid, customer_id: &str) -> LedgerResult<String> {
    sqlx::query("INSERT INTO billing_customers (user_id, customer_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING")
      .bind(user_id)
      .bind(customer_id)
      .execute(&self.pool)
      .await?;
    let linked: String = sqlx::query_scalar("SELECT customer_id FROM billing_customers WHERE user_id = $1")
      .bind(user_id)
      .fetch_one(&self.pool)
      .await?;
    Ok(linked)
  }

  async fn is_event_processed(&self, event_id: &str) -> LedgerResult<bool> {
    let found: Option<String> = sqlx::query_scalar("SELECT event_id FROM processed_webhook_events WHERE event_id = $1")
      .bind(event_id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(found.is_some())
  }

  async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> LedgerResult<bool> {
    let result = sqlx::query(
      "INSERT INTO processed_webhook_events (event_id, event_type) VALUES ($1, $2) ON CONFLICT (event_id) DO NOTHING",
    )
    .bind(event_id)
    .bind(event_type)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }
}
