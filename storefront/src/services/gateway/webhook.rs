// storefront/src/services/gateway/webhook.rs

//! Processor webhook verification and event decoding.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex hmac>[,v1=...]`.
//! The HMAC-SHA256 is computed over `"{t}.{raw body}"` with the endpoint secret,
//! so verification must run on the exact bytes that were received.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
  #[error("signature header is missing")]
  MissingHeader,

  #[error("signature header is malformed")]
  Malformed,

  #[error("signature timestamp is outside the tolerance window")]
  OutsideTolerance,

  #[error("no signature matches the payload")]
  NoMatch,

  #[error("event payload could not be decoded: {0}")]
  InvalidPayload(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEventData {
  pub payment_id: String,
  pub amount: Option<i64>,
  pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEventData {
  pub subscription_id: String,
  pub customer_id: Option<String>,
  /// Raw processor status, mapped by the reconciler.
  pub status: String,
  pub current_period_end: Option<i64>,
  pub interval: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
  PaymentSucceeded(PaymentEventData),
  PaymentFailed(PaymentEventData),
  /// `customer.subscription.created` and `customer.subscription.updated`.
  SubscriptionChanged(SubscriptionEventData),
  SubscriptionDeleted(SubscriptionEventData),
  /// Recognised envelope, event type not handled here.
  Unhandled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
  pub id: String,
  pub event_type: String,
  /// Processor creation time, unix seconds.
  pub created: i64,
  pub kind: WebhookEventKind,
}

#[derive(Deserialize)]
struct RawEvent {
  id: String,
  #[serde(rename = "type")]
  event_type: String,
  created: i64,
  data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
  object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawPaymentIntent {
  id: String,
  amount: Option<i64>,
  currency: Option<String>,
}

#[derive(Deserialize)]
struct RawSubscription {
  id: String,
  customer: Option<String>,
  status: String,
  current_period_end: Option<i64>,
  items: Option<RawList<RawSubscriptionItem>>,
}

#[derive(Deserialize)]
struct RawList<T> {
  data: Vec<T>,
}

#[derive(Deserialize)]
struct RawSubscriptionItem {
  price: Option<RawPrice>,
}

#[derive(Deserialize)]
struct RawPrice {
  recurring: Option<RawRecurring>,
}

#[derive(Deserialize)]
struct RawRecurring {
  interval: String,
}

fn compute_signature(payload: &[u8], secret: &str, timestamp: i64) -> Result<Vec<u8>, SignatureError> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
  mac.update(timestamp.to_string().as_bytes());
  mac.update(b".");
  mac.update(payload);
  Ok(mac.finalize().into_bytes().to_vec())
}

/// Builds a valid signature header for `payload`. Used to sign test fixtures.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
  let sig = compute_signature(payload, secret, timestamp).unwrap_or_default();
  format!("t={},v1={}", timestamp, hex::encode(sig))
}

/// Checks the header against `raw_body` and decodes the event.
///
/// `now` is unix seconds. A signature older or newer than `tolerance` is rejected
/// even when it matches, which bounds replay of captured deliveries.
pub fn verify_webhook_signature(
  raw_body: &[u8],
  signature_header: &str,
  secret: &str,
  tolerance: Duration,
  now: i64,
) -> Result<WebhookEvent, SignatureError> {
  if signature_header.trim().is_empty() {
    return Err(SignatureError::MissingHeader);
  }

  let mut timestamp: Option<i64> = None;
  let mut candidates: Vec<Vec<u8>> = Vec::new();
  for part in signature_header.split(',') {
    let (key, value) = part.trim().split_once('=').ok_or(SignatureError::Malformed)?;
    match key {
      "t" => timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?),
      "v1" => {
        if let Ok(bytes) = hex::decode(value) {
          candidates.push(bytes);
        }
      }
      _ => {}
    }
  }
  let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
  if candidates.is_empty() {
    return Err(SignatureError::NoMatch);
  }

  if now.abs_diff(timestamp) > tolerance.as_secs() {
    return Err(SignatureError::OutsideTolerance);
  }

  let expected = compute_signature(raw_body, secret, timestamp)?;
  let matched = candidates
    .iter()
    .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));
  if !matched {
    return Err(SignatureError::NoMatch);
  }

  parse_event(raw_body)
}

/// Decodes an already verified payload.
pub fn parse_event(raw_body: &[u8]) -> Result<WebhookEvent, SignatureError> {
  let raw: RawEvent = serde_json::from_slice(raw_body).map_err(|e| SignatureError::InvalidPayload(e.to_string()))?;
  let decode_err = |e: serde_json::Error| SignatureError::InvalidPayload(format!("{}: {}", raw.event_type, e));

  let kind = match raw.event_type.as_str() {
    "payment_intent.succeeded" | "payment_intent.payment_failed" => {
      let pi: RawPaymentIntent = serde_json::from_value(raw.data.object).map_err(decode_err)?;
      let data = PaymentEventData {
        payment_id: pi.id,
        amount: pi.amount,
        currency: pi.currency.map(|c| c.to_ascii_lowercase()),
      };
      if raw.event_type == "payment_intent.succeeded" {
        WebhookEventKind::PaymentSucceeded(data)
      } else {
        WebhookEventKind::PaymentFailed(data)
      }
    }
    "customer.subscription.created" | "customer.subscription.updated" | "customer.subscription.deleted" => {
      let sub: RawSubscription = serde_json::from_value(raw.data.object).map_err(decode_err)?;
      let interval = sub
        .items
        .and_then(|items| items.data.into_iter().next())
        .and_then(|item| item.price)
        .and_then(|price| price.recurring)
        .map(|r| r.interval);
      let data = SubscriptionEventData {
        subscription_id: sub.id,
        customer_id: sub.customer,
        status: sub.status,
        current_period_end: sub.current_period_end,
        interval,
      };
      if raw.event_type == "customer.subscription.deleted" {
        WebhookEventKind::SubscriptionDeleted(data)
      } else {
        WebhookEventKind::SubscriptionChanged(data)
      }
    }
    _ => WebhookEventKind::Unhandled,
  };

  Ok(WebhookEvent {
    id: raw.id,
    event_type: raw.event_type,
    created: raw.created,
    kind,
  })
}
