// storefront/src/services/gateway/mock.rs

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::info;

use super::{
  ChargeIntent, ChargeIntentRequest, CreatedSubscription, CustomerProfile, GatewayError, GatewayPayment,
  GatewayPaymentStatus, GatewayResult, OffSessionCharge, PaymentGateway, SavedPaymentMethod, SetupIntent,
};
use crate::models::SubscriptionStatus;

#[derive(Default)]
struct MockState {
  next_id: u64,
  payments: HashMap<String, GatewayPayment>,
  payment_methods: HashMap<String, Vec<SavedPaymentMethod>>,
  customers_created: Vec<String>,
  canceled_subscriptions: Vec<String>,
  /// Results of earlier off-session charges, keyed by idempotency key.
  charges_by_key: HashMap<String, GatewayResult<GatewayPayment>>,
  scripted_charges: VecDeque<GatewayResult<GatewayPaymentStatus>>,
  charge_attempts: usize,
  fail_next: HashMap<&'static str, GatewayError>,
}

impl MockState {
  fn next(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{}_mock_{}", prefix, self.next_id)
  }

  fn injected(&mut self, operation: &'static str) -> GatewayResult<()> {
    match self.fail_next.remove(operation) {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

/// In-process processor stand-in with scriptable outcomes.
///
/// Intents created here are remembered, so a later `retrieve_payment` sees
/// them. Off-session charges replay the stored result for a repeated
/// idempotency key, as the real processor does.
#[derive(Default)]
pub struct MockGateway {
  state: Mutex<MockState>,
}

impl MockGateway {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers or overwrites what `retrieve_payment(payment_id)` returns.
  pub fn set_payment(&self, payment_id: &str, status: GatewayPaymentStatus, amount: i64, currency: &str) {
    self.state.lock().payments.insert(
      payment_id.to_string(),
      GatewayPayment {
        payment_id: payment_id.to_string(),
        status,
        amount,
        currency: currency.to_string(),
        customer_id: None,
      },
    );
  }

  pub fn add_payment_method(&self, customer_id: &str, method: SavedPaymentMethod) {
    self
      .state
      .lock()
      .payment_methods
      .entry(customer_id.to_string())
      .or_default()
      .push(method);
  }

  /// Queues the outcome of the next off-session charge that uses a fresh idempotency key.
  pub fn script_charge(&self, outcome: GatewayResult<GatewayPaymentStatus>) {
    self.state.lock().scripted_charges.push_back(outcome);
  }

  /// Makes the next call of `operation` fail with `err`.
  pub fn fail_next(&self, operation: &'static str, err: GatewayError) {
    self.state.lock().fail_next.insert(operation, err);
  }

  pub fn charge_attempts(&self) -> usize {
    self.state.lock().charge_attempts
  }

  pub fn customers_created(&self) -> usize {
    self.state.lock().customers_created.len()
  }

  pub fn canceled_subscriptions(&self) -> Vec<String> {
    self.state.lock().canceled_subscriptions.clone()
  }
}

#[async_trait]
impl PaymentGateway for MockGateway {
  fn provider(&self) -> &'static str {
    "mock"
  }

  async fn create_charge_intent(&self, request: ChargeIntentRequest) -> GatewayResult<ChargeIntent> {
    let mut s = self.state.lock();
    s.injected("create_charge_intent")?;
    let intent_id = s.next("pi");
    s.payments.insert(
      intent_id.clone(),
      GatewayPayment {
        payment_id: intent_id.clone(),
        status: GatewayPaymentStatus::Processing,
        amount: request.amount,
        currency: request.currency.clone(),
        customer_id: request.customer_id.clone(),
      },
    );
    Ok(ChargeIntent {
      client_secret: format!("{}_secret", intent_id),
      intent_id,
    })
  }

  async fn create_setup_intent(&self, _customer_id: &str) -> GatewayResult<SetupIntent> {
    let mut s = self.state.lock();
    s.injected("create_setup_intent")?;
    let id = s.next("seti");
    Ok(SetupIntent {
      client_secret: format!("{}_secret", id),
      setup_intent_id: id,
    })
  }

  async fn retrieve_payment(&self, payment_id: &str) -> GatewayResult<GatewayPayment> {
    let mut s = self.state.lock();
    s.injected("retrieve_payment")?;
    s.payments
      .get(payment_id)
      .cloned()
      .ok_or_else(|| GatewayError::Rejected(format!("No such payment_intent: '{}'", payment_id)))
  }

  async fn create_customer(&self, profile: &CustomerProfile) -> GatewayResult<String> {
    let mut s = self.state.lock();
    s.injected("create_customer")?;
    let id = s.next("cus");
    s.customers_created.push(id.clone());
    info!(user_id = %profile.user_id, customer_id = %id, "Mock customer created.");
    Ok(id)
  }

  async fn create_subscription(&self, _customer_id: &str, price_ref: &str) -> GatewayResult<CreatedSubscription> {
    let mut s = self.state.lock();
    s.injected("create_subscription")?;
    if price_ref.trim().is_empty() {
      return Err(GatewayError::Rejected("missing price".to_string()));
    }
    let id = s.next("sub");
    Ok(CreatedSubscription {
      client_secret: Some(format!("{}_secret", id)),
      subscription_id: id,
      status: SubscriptionStatus::Incomplete,
      current_period_end: None,
    })
  }

  async fn charge_off_session(&self, charge: OffSessionCharge) -> GatewayResult<GatewayPayment> {
    let mut s = self.state.lock();
    s.charge_attempts += 1;
    if let Some(previous) = s.charges_by_key.get(&charge.idempotency_key) {
      return previous.clone();
    }
    s.injected("charge_off_session")?;

    let outcome = s.scripted_charges.pop_front().unwrap_or(Ok(GatewayPaymentStatus::Succeeded));
    let payment_id = s.next("pi");
    let result = match outcome {
      Ok(GatewayPaymentStatus::Failed) | Ok(GatewayPaymentStatus::Canceled) => Err(GatewayError::Declined {
        code: "card_declined".to_string(),
        message: "Your card was declined.".to_string(),
        payment_id: Some(payment_id.clone()),
      }),
      Ok(status) => Ok(GatewayPayment {
        payment_id: payment_id.clone(),
        status,
        amount: charge.amount,
        currency: charge.currency.clone(),
        customer_id: Some(charge.customer_id.clone()),
      }),
      Err(err) => Err(err),
    };
    // Declines are replayed like successes; only an unknown outcome leaves the key free.
    if !matches!(&result, Err(err) if err.is_retryable()) {
      s.charges_by_key.insert(charge.idempotency_key.clone(), result.clone());
    }
    if let Ok(payment) = &result {
      s.payments.insert(payment.payment_id.clone(), payment.clone());
    }
    result
  }

  async fn cancel_subscription(&self, subscription_id: &str) -> GatewayResult<SubscriptionStatus> {
    let mut s = self.state.lock();
    s.injected("cancel_subscription")?;
    s.canceled_subscriptions.push(subscription_id.to_string());
    Ok(SubscriptionStatus::Canceled)
  }

  async fn attach_payment_method(&self, customer_id: &str, payment_method_id: &str) -> GatewayResult<()> {
    let mut s = self.state.lock();
    s.injected("attach_payment_method")?;
    let methods = s.payment_methods.entry(customer_id.to_string()).or_default();
    for m in methods.iter_mut() {
      m.is_default = false;
    }
    match methods.iter_mut().find(|m| m.id == payment_method_id) {
      Some(existing) => existing.is_default = true,
      None => methods.push(SavedPaymentMethod {
        id: payment_method_id.to_string(),
        kind: "card".to_string(),
        is_default: true,
      }),
    }
    Ok(())
  }

  async fn list_payment_methods(&self, customer_id: &str) -> GatewayResult<Vec<SavedPaymentMethod>> {
    let mut s = self.state.lock();
    s.injected("list_payment_methods")?;
    Ok(s.payment_methods.get(customer_id).cloned().unwrap_or_default())
  }
}
