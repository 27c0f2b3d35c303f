// storefront/src/ledger/memory.rs

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
  InstallmentCharge, InstallmentFailure, InstallmentUpdate, LedgerError, LedgerResult, LedgerStore, NewEmiPlan,
  NewOrder, NewPayment, NewSubscription, PaymentUpdate, RecordOutcome, SubscriptionObservation, SubscriptionUpdate,
};
use crate::models::{
  local_observation_time, BillingCustomer, EmiPlan, Order, OrderItem, OrderStatus, OrderWithItems, Payment,
  PaymentStatus, Subscription, SubscriptionStatus, UnmatchedPaymentEvent,
};

#[derive(Default)]
struct Tables {
  orders: HashMap<Uuid, Order>,
  items: Vec<OrderItem>,
  payments: HashMap<String, Payment>,
  subscriptions: HashMap<String, Subscription>,
  emi_plans: HashMap<Uuid, EmiPlan>,
  customers: HashMap<Uuid, BillingCustomer>,
  unmatched: HashMap<String, UnmatchedPaymentEvent>,
  processed_events: HashMap<String, String>,
}

impl Tables {
  fn with_items(&self, order: &Order) -> OrderWithItems {
    OrderWithItems {
      order: order.clone(),
      items: self.items.iter().filter(|i| i.order_id == order.id).cloned().collect(),
    }
  }

  fn build_payment(p: NewPayment) -> Payment {
    let now = Utc::now();
    Payment {
      id: Uuid::new_v4(),
      external_id: p.external_id,
      amount: p.amount,
      currency: p.currency,
      status: p.status,
      user_id: p.user_id,
      order_id: p.order_id,
      emi_plan_id: p.emi_plan_id,
      created_at: now,
      updated_at: now,
    }
  }
}

/// A [`LedgerStore`] held in process memory.
///
/// Each operation runs under one mutex and validates before it writes, which
/// gives it the same all-or-nothing and uniqueness behaviour as the Postgres
/// store. Used by tests and by `GATEWAY_PROVIDER=mock` demos.
#[derive(Default)]
pub struct InMemoryLedger {
  tables: Mutex<Tables>,
}

impl InMemoryLedger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn order_count(&self) -> usize {
    self.tables.lock().orders.len()
  }

  pub fn payment_count(&self) -> usize {
    self.tables.lock().payments.len()
  }

  pub fn payments(&self) -> Vec<Payment> {
    self.tables.lock().payments.values().cloned().collect()
  }

  pub fn unmatched_count(&self) -> usize {
    self.tables.lock().unmatched.len()
  }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
  async fn record_order_atomic(&self, order: NewOrder) -> LedgerResult<RecordOutcome> {
    let mut t = self.tables.lock();
    let now = Utc::now();
    let order_id = Uuid::new_v4();

    if let Some(payment) = &order.payment {
      if let Some(existing) = t.payments.get(&payment.external_id) {
        return match existing.order_id {
          Some(existing_order) => Ok(RecordOutcome::Duplicate { order_id: existing_order }),
          None => Err(LedgerError::Conflict(format!(
            "payment {} is recorded without an order",
            payment.external_id
          ))),
        };
      }
    }
    if let Some(link) = &order.subscription {
      if let Some(sub) = t.subscriptions.get(&link.external_id) {
        if sub.user_id != order.user_id {
          return Err(LedgerError::Conflict(format!(
            "subscription {} belongs to another user",
            link.external_id
          )));
        }
      }
    }
    if let Some(plan_id) = order.emi_plan_id {
      let ok = t
        .emi_plans
        .get(&plan_id)
        .is_some_and(|p| p.user_id == order.user_id && p.activated_at.is_none() && p.installments_remaining > 0);
      if !ok {
        return Err(LedgerError::Conflict(format!(
          "EMI plan {} is not awaiting its first payment",
          plan_id
        )));
      }
    }

    // Validation done; everything below succeeds.
    let mut payment_status = order.payment.as_ref().map(|p| p.status);
    if let Some(payment) = &order.payment {
      if let Some(early) = t.unmatched.remove(&payment.external_id) {
        if payment.status.can_become(early.status) {
          payment_status = Some(early.status);
        }
      }
    }

    let subscription_id = order.subscription.as_ref().map(|link| {
      let sub = t.subscriptions.entry(link.external_id.clone()).or_insert_with(|| Subscription {
        id: Uuid::new_v4(),
        external_id: link.external_id.clone(),
        user_id: order.user_id,
        period: link.period,
        status: SubscriptionStatus::Incomplete,
        order_id: None,
        current_period_end: None,
        status_updated_at: local_observation_time(),
        created_at: now,
      });
      if sub.order_id.is_none() {
        sub.order_id = Some(order_id);
      }
      sub.id
    });

    t.orders.insert(
      order_id,
      Order {
        id: order_id,
        user_id: order.user_id,
        total_amount: order.total_amount,
        currency: order.currency.clone(),
        status: NewOrder::initial_status(payment_status),
        subscription_id,
        emi_plan_id: order.emi_plan_id,
        created_at: now,
        updated_at: now,
      },
    );
    for item in &order.items {
      t.items.push(OrderItem {
        id: Uuid::new_v4(),
        order_id,
        product_id: item.product_id.clone(),
        quantity: item.quantity,
        unit_price: item.unit_price,
      });
    }
    if let (Some(payment), Some(status)) = (&order.payment, payment_status) {
      let row = Tables::build_payment(NewPayment {
        external_id: payment.external_id.clone(),
        amount: payment.amount,
        currency: payment.currency.clone(),
        status,
        user_id: order.user_id,
        order_id: Some(order_id),
        emi_plan_id: order.emi_plan_id,
      });
      t.payments.insert(row.external_id.clone(), row);
    }
    if let (Some(plan_id), Some(payment), Some(status)) = (order.emi_plan_id, &order.payment, payment_status) {
      if status != PaymentStatus::Failed {
        if let Some(plan) = t.emi_plans.get_mut(&plan_id) {
          plan.activated_at = Some(now);
          plan.order_id = Some(order_id);
          plan.apply_installment(&payment.external_id, status, now);
        }
      }
    }
    Ok(RecordOutcome::Created { order_id })
  }

  async fn get_order(&self, order_id: Uuid) -> LedgerResult<Option<OrderWithItems>> {
    let t = self.tables.lock();
    Ok(t.orders.get(&order_id).map(|o| t.with_items(o)))
  }

  async fn list_orders_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<OrderWithItems>> {
    let t = self.tables.lock();
    let mut orders: Vec<&Order> = t.orders.values().filter(|o| o.user_id == user_id).collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(orders.into_iter().map(|o| t.with_items(o)).collect())
  }

  async fn list_all_orders(&self, limit: i64) -> LedgerResult<Vec<OrderWithItems>> {
    let t = self.tables.lock();
    let mut orders: Vec<&Order> = t.orders.values().collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
    Ok(orders.into_iter().take(limit).map(|o| t.with_items(o)).collect())
  }

  async fn transition_order_status(&self, order_id: Uuid, next: OrderStatus) -> LedgerResult<Order> {
    let mut t = self.tables.lock();
    let order = t
      .orders
      .get_mut(&order_id)
      .ok_or_else(|| LedgerError::NotFound(format!("order {}", order_id)))?;
    if order.status == next {
      return Ok(order.clone());
    }
    if !order.status.can_transition_to(next) {
      return Err(LedgerError::Conflict(format!(
        "order {} cannot move from {} to {}",
        order_id, order.status, next
      )));
    }
    order.status = next;
    order.updated_at = Utc::now();
    Ok(order.clone())
  }

  async fn find_payment_by_external_id(&self, external_id: &str) -> LedgerResult<Option<Payment>> {
    Ok(self.tables.lock().payments.get(external_id).cloned())
  }

  async fn apply_payment_status(&self, external_id: &str, status: PaymentStatus) -> LedgerResult<PaymentUpdate> {
    let mut t = self.tables.lock();
    let Some(payment) = t.payments.get_mut(external_id) else {
      return Ok(PaymentUpdate::NotFound);
    };
    if !payment.status.can_become(status) {
      return Ok(PaymentUpdate::Unchanged(payment.clone()));
    }
    payment.status = status;
    payment.updated_at = Utc::now();
    let updated = payment.clone();
    if let Some(order) = updated.order_id.and_then(|id| t.orders.get_mut(&id)) {
      if order.status == OrderStatus::Pending {
        order.status = NewOrder::initial_status(Some(status));
        order.updated_at = Utc::now();
      }
    }
    if let Some(plan) = updated.emi_plan_id.and_then(|id| t.emi_plans.get_mut(&id)) {
      plan.settle_installment(&updated.external_id, status);
    }
    Ok(PaymentUpdate::Applied(updated))
  }

  async fn record_unmatched_payment(&self, event: UnmatchedPaymentEvent) -> LedgerResult<()> {
    self
      .tables
      .lock()
      .unmatched
      .entry(event.external_id.clone())
      .or_insert(event);
    Ok(())
  }

  async fn insert_subscription(&self, sub: NewSubscription) -> LedgerResult<Subscription> {
    let mut t = self.tables.lock();
    let row = t.subscriptions.entry(sub.external_id.clone()).or_insert_with(|| Subscription {
      id: Uuid::new_v4(),
      external_id: sub.external_id.clone(),
      user_id: sub.user_id,
      period: sub.period,
      status: sub.status,
      order_id: sub.order_id,
      current_period_end: sub.current_period_end,
      status_updated_at: sub.observed_at,
      created_at: Utc::now(),
    });
    Ok(row.clone())
  }

  async fn find_subscription_by_external_id(&self, external_id: &str) -> LedgerResult<Option<Subscription>> {
    Ok(self.tables.lock().subscriptions.get(external_id).cloned())
  }

  async fn list_subscriptions_for_user(&self, user_id: Uuid) -> LedgerResult<Vec<Subscription>> {
    let t = self.tables.lock();
    let mut subs: Vec<Subscription> = t.subscriptions.values().filter(|s| s.user_id == user_id).cloned().collect();
    subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(subs)
  }

  async fn apply_subscription_observation(&self, obs: SubscriptionObservation) -> LedgerResult<SubscriptionUpdate> {
    let mut t = self.tables.lock();
    let Some(sub) = t.subscriptions.get_mut(&obs.external_id) else {
      return Ok(SubscriptionUpdate::NotFound);
    };
    if !sub.accepts_update(obs.observed_at) {
      return Ok(SubscriptionUpdate::Ignored(sub.clone()));
    }
    sub.status = obs.status;
    if obs.current_period_end.is_some() {
      sub.current_period_end = obs.current_period_end;
    }
    sub.status_updated_at = obs.observed_at;
    Ok(SubscriptionUpdate::Applied(sub.clone()))
  }

  async fn insert_emi_plan(&self, plan: NewEmiPlan) -> LedgerResult<EmiPlan> {
    let mut t = self.tables.lock();
    if t.emi_plans.contains_key(&plan.id) {
      return Err(LedgerError::Conflict(format!("EMI plan {} already exists", plan.id)));
    }
    let row = EmiPlan {
      id: plan.id,
      user_id: plan.user_id,
      customer_id: plan.customer_id,
      currency: plan.currency,
      total_amount: plan.total_amount,
      installment_amount: plan.installment_amount,
      installment_count: plan.installment_count,
      installments_remaining: plan.installment_count,
      first_intent_id: plan.first_intent_id,
      order_id: None,
      activated_at: None,
      last_charged_at: None,
      completed: false,
      blocked_reason: None,
      pending_payment_id: None,
      failed_attempts: 0,
      created_at: Utc::now(),
    };
    t.emi_plans.insert(row.id, row.clone());
    Ok(row)
  }

  async fn get_emi_plan(&self, plan_id: Uuid) -> LedgerResult<Option<EmiPlan>> {
    Ok(self.tables.lock().emi_plans.get(&plan_id).cloned())
  }

  async fn list_chargeable_emi_plans(&self) -> LedgerResult<Vec<EmiPlan>> {
    let t = self.tables.lock();
    let mut plans: Vec<EmiPlan> = t
      .emi_plans
      .values()
      .filter(|p| p.is_active() && p.installments_remaining > 0)
      .cloned()
      .collect();
    plans.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(plans)
  }

  async fn record_installment_charge(&self, charge: InstallmentCharge) -> LedgerResult<InstallmentUpdate> {
    if charge.payment.status == PaymentStatus::Failed {
      return Err(LedgerError::Conflict(format!(
        "payment {} failed; record it with record_installment_failure",
        charge.payment.external_id
      )));
    }
    let mut t = self.tables.lock();
    if t.payments.contains_key(&charge.payment.external_id) {
      return Ok(InstallmentUpdate::Stale);
    }
    let Some(plan) = t.emi_plans.get_mut(&charge.plan_id) else {
      return Err(LedgerError::NotFound(format!("EMI plan {}", charge.plan_id)));
    };
    if plan.installments_remaining != charge.expected_remaining
      || plan.installments_remaining <= 0
      || plan.pending_payment_id.is_some()
    {
      return Ok(InstallmentUpdate::Stale);
    }
    plan.apply_installment(&charge.payment.external_id, charge.payment.status, charge.charged_at);
    let updated = plan.clone();
    let row = Tables::build_payment(charge.payment);
    t.payments.insert(row.external_id.clone(), row);
    Ok(InstallmentUpdate::Applied(updated))
  }

  async fn record_installment_failure(&self, failure: InstallmentFailure) -> LedgerResult<()> {
    let mut t = self.tables.lock();
    if t.payments.contains_key(&failure.payment.external_id) {
      return Ok(());
    }
    if let Some(plan) = t.emi_plans.get_mut(&failure.plan_id) {
      if plan.installments_remaining == failure.expected_remaining {
        plan.failed_attempts += 1;
      }
    }
    let row = Tables::build_payment(failure.payment);
    t.payments.insert(row.external_id.clone(), row);
    Ok(())
  }

  async fn set_emi_plan_blocked(&self, plan_id: Uuid, reason: Option<String>) -> LedgerResult<()> {
    if let Some(plan) = self.tables.lock().emi_plans.get_mut(&plan_id) {
      plan.blocked_reason = reason;
    }
    Ok(())
  }

  async fn find_customer(&self, user_id: Uuid) -> LedgerResult<Option<BillingCustomer>> {
    Ok(self.tables.lock().customers.get(&user_id).cloned())
  }

  async fn find_customer_by_customer_id(&self, customer_id: &str) -> LedgerResult<Option<BillingCustomer>> {
    Ok(
      self
        .tables
        .lock()
        .customers
        .values()
        .find(|c| c.customer_id == customer_id)
        .cloned(),
    )
  }

  async fn link_customer(&self, user_id: Uuid, customer_id: &str) -> LedgerResult<String> {
    let mut t = self.tables.lock();
    let linked = t.customers.entry(user_id).or_insert_with(|| BillingCustomer {
      user_id,
      customer_id: customer_id.to_string(),
      created_at: Utc::now(),
    });
    Ok(linked.customer_id.clone())
  }

  async fn is_event_processed(&self, event_id: &str) -> LedgerResult<bool> {
    Ok(self.tables.lock().processed_events.contains_key(event_id))
  }

  async fn mark_event_processed(&self, event_id: &str, event_type: &str) -> LedgerResult<bool> {
    let mut t = self.tables.lock();
    if t.processed_events.contains_key(event_id) {
      return Ok(false);
    }
    t.processed_events.insert(event_id.to_string(), event_type.to_string());
    Ok(true)
  }
}
