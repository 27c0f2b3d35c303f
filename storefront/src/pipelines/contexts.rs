// storefront/src/pipelines/contexts.rs

//! Context data threaded through each flow. Handlers receive these wrapped in
//! `storeledger_flow::FlowContext`.

use actix_web::web::Bytes;
use uuid::Uuid;

use crate::ledger::{NewLineItem, SubscriptionLink};
use crate::models::{BillingPeriod, EmiPlan, PaymentStatus, SubscriptionStatus};
use crate::services::gateway::webhook::WebhookEvent;
use crate::services::gateway::{ChargeIntent, SetupIntent};
use crate::state::AppState;

// --- Checkout ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
  pub product_id: String,
  pub quantity: i32,
  pub unit_price: i64,
}

/// What the client claims about a payment it completed.
#[derive(Debug, Clone)]
pub struct CheckoutInput {
  pub payment_id: String,
  pub amount: i64,
  pub currency: Option<String>,
  pub status: String,
  pub cart: Vec<CartLine>,
  pub subscription_id: Option<String>,
  pub emi_id: Option<Uuid>,
  pub period: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutCtx {
  pub app_state: AppState,
  pub user_id: Uuid,
  pub input: CheckoutInput,

  pub items: Vec<NewLineItem>,
  pub cart_total: i64,
  pub currency: String,
  /// Order total, settled once the billing context is known.
  pub order_total: i64,
  pub payment_status: PaymentStatus,
  pub subscription: Option<SubscriptionLink>,
  pub emi_plan: Option<EmiPlan>,

  pub order_id: Option<Uuid>,
  /// The payment id was already recorded by an earlier request.
  pub duplicate: bool,
}

impl CheckoutCtx {
  pub fn new(app_state: AppState, user_id: Uuid, input: CheckoutInput) -> Self {
    Self {
      app_state,
      user_id,
      input,
      items: Vec::new(),
      cart_total: 0,
      currency: String::new(),
      order_total: 0,
      payment_status: PaymentStatus::Pending,
      subscription: None,
      emi_plan: None,
      order_id: None,
      duplicate: false,
    }
  }
}

// --- Subscriptions ---

#[derive(Clone)]
pub struct SubscriptionCtx {
  pub app_state: AppState,
  pub user_id: Uuid,
  pub price_ref: String,
  pub period: BillingPeriod,
  pub customer_id: Option<String>,
  pub subscription_id: Option<String>,
  pub client_secret: Option<String>,
  pub status: Option<SubscriptionStatus>,
  pub current_period_end: Option<i64>,
}

impl SubscriptionCtx {
  pub fn new(app_state: AppState, user_id: Uuid, price_ref: String, period: BillingPeriod) -> Self {
    Self {
      app_state,
      user_id,
      price_ref,
      period,
      customer_id: None,
      subscription_id: None,
      client_secret: None,
      status: None,
      current_period_end: None,
    }
  }
}

// --- EMI plans ---

#[derive(Clone)]
pub struct EmiCtx {
  pub app_state: AppState,
  pub user_id: Uuid,
  pub total_amount: i64,
  pub months: i32,
  pub currency: String,

  pub plan_id: Uuid,
  pub installment_amount: i64,
  pub customer_id: Option<String>,
  pub charge_intent: Option<ChargeIntent>,
  pub setup_intent: Option<SetupIntent>,
}

impl EmiCtx {
  pub fn new(app_state: AppState, user_id: Uuid, total_amount: i64, months: i32, currency: String) -> Self {
    Self {
      app_state,
      user_id,
      total_amount,
      months,
      currency,
      plan_id: Uuid::new_v4(),
      installment_amount: 0,
      customer_id: None,
      charge_intent: None,
      setup_intent: None,
    }
  }
}

// --- Webhooks ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
  Applied,
  /// Event id seen before.
  Replayed,
  /// Recognised but nothing to change.
  Ignored,
  /// Stored until the matching order is recorded.
  Deferred,
}

#[derive(Clone)]
pub struct WebhookCtx {
  pub app_state: AppState,
  pub raw_body: Bytes,
  pub signature_header: Option<String>,
  pub event: Option<WebhookEvent>,
  pub disposition: WebhookDisposition,
}

impl WebhookCtx {
  pub fn new(app_state: AppState, raw_body: Bytes, signature_header: Option<String>) -> Self {
    Self {
      app_state,
      raw_body,
      signature_header,
      event: None,
      disposition: WebhookDisposition::Ignored,
    }
  }
}
