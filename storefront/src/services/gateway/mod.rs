// storefront/src/services/gateway/mod.rs

//! Uniform interface over the external payment processor.
//!
//! Amounts are minor-unit integers everywhere. Network failures
//! ([`GatewayError::Timeout`], [`GatewayError::Unavailable`]) are kept apart
//! from business refusals ([`GatewayError::Declined`]) so callers can choose
//! between retrying and telling the user.

pub mod mock;
pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::SubscriptionStatus;

pub use mock::MockGateway;
pub use stripe::StripeGateway;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
  /// The processor refused the charge. Terminal for this attempt.
  #[error("payment declined ({code}): {message}")]
  Declined {
    code: String,
    message: String,
    payment_id: Option<String>,
  },

  /// No answer within the configured bound; the outcome is unknown.
  #[error("processor call timed out: {0}")]
  Timeout(String),

  #[error("processor unavailable: {0}")]
  Unavailable(String),

  #[error("processor rejected the request: {0}")]
  Rejected(String),

  #[error("could not decode processor response: {0}")]
  Decode(String),
}

impl GatewayError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, GatewayError::Timeout(_) | GatewayError::Unavailable(_))
  }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone)]
pub struct ChargeIntentRequest {
  pub amount: i64,
  pub currency: String,
  pub customer_id: Option<String>,
  /// Keep the payment method for later off-session charges.
  pub save_payment_method: bool,
  pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeIntent {
  pub intent_id: String,
  pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupIntent {
  pub setup_intent_id: String,
  pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerProfile {
  pub user_id: Uuid,
  pub email: Option<String>,
  pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSubscription {
  pub subscription_id: String,
  pub status: SubscriptionStatus,
  /// Secret of the first invoice's payment intent, when one needs confirming.
  pub client_secret: Option<String>,
  pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
  Succeeded,
  /// Accepted but not final (processing, requires action or confirmation).
  Processing,
  Failed,
  Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPayment {
  pub payment_id: String,
  pub status: GatewayPaymentStatus,
  pub amount: i64,
  pub currency: String,
  pub customer_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OffSessionCharge {
  pub customer_id: String,
  pub payment_method_id: String,
  pub amount: i64,
  pub currency: String,
  /// Same key, same charge: the processor will not charge twice.
  pub idempotency_key: String,
  pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPaymentMethod {
  pub id: String,
  pub kind: String,
  pub is_default: bool,
}

/// Picks the flagged default method, else the first card on file.
pub fn preferred_payment_method(methods: &[SavedPaymentMethod]) -> Option<&SavedPaymentMethod> {
  methods
    .iter()
    .find(|m| m.is_default)
    .or_else(|| methods.iter().find(|m| m.kind == "card"))
    .or_else(|| methods.first())
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
  fn provider(&self) -> &'static str;

  async fn create_charge_intent(&self, request: ChargeIntentRequest) -> GatewayResult<ChargeIntent>;

  async fn create_setup_intent(&self, customer_id: &str) -> GatewayResult<SetupIntent>;

  async fn retrieve_payment(&self, payment_id: &str) -> GatewayResult<GatewayPayment>;

  async fn create_customer(&self, profile: &CustomerProfile) -> GatewayResult<String>;

  async fn create_subscription(&self, customer_id: &str, price_ref: &str) -> GatewayResult<CreatedSubscription>;

  async fn charge_off_session(&self, charge: OffSessionCharge) -> GatewayResult<GatewayPayment>;

  async fn cancel_subscription(&self, subscription_id: &str) -> GatewayResult<SubscriptionStatus>;

  /// Attaches the method to the customer and makes it the default.
  async fn attach_payment_method(&self, customer_id: &str, payment_method_id: &str) -> GatewayResult<()>;

  async fn list_payment_methods(&self, customer_id: &str) -> GatewayResult<Vec<SavedPaymentMethod>>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn method(id: &str, kind: &str, is_default: bool) -> SavedPaymentMethod {
    SavedPaymentMethod {
      id: id.to_string(),
      kind: kind.to_string(),
      is_default,
    }
  }

  #[test]
  fn default_method_wins_over_first_card() {
    let methods = vec![method("pm_a", "card", false), method("pm_b", "card", true)];
    assert_eq!(preferred_payment_method(&methods).map(|m| m.id.as_str()), Some("pm_b"));
  }

  #[test]
  fn falls_back_to_first_card() {
    let methods = vec![method("pm_upi", "upi", false), method("pm_card", "card", false)];
    assert_eq!(preferred_payment_method(&methods).map(|m| m.id.as_str()), Some("pm_card"));
    assert!(preferred_payment_method(&[]).is_none());
  }

  #[test]
  fn only_network_failures_are_retryable() {
    assert!(GatewayError::Timeout("x".into()).is_retryable());
    assert!(GatewayError::Unavailable("x".into()).is_retryable());
    assert!(!GatewayError::Rejected("x".into()).is_retryable());
    assert!(!GatewayError::Declined {
      code: "card_declined".into(),
      message: "no".into(),
      payment_id: None
    }
    .is_retryable());
  }
}
