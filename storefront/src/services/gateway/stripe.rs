// storefront/src/services/gateway/stripe.rs

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{
  ChargeIntent, ChargeIntentRequest, CreatedSubscription, CustomerProfile, GatewayError, GatewayPayment,
  GatewayPaymentStatus, GatewayResult, OffSessionCharge, PaymentGateway, SavedPaymentMethod, SetupIntent,
};
use crate::models::SubscriptionStatus;

/// Stripe REST client. Constructed once at startup from configuration.
#[derive(Clone)]
pub struct StripeGateway {
  http: Client,
  api_base: String,
  secret_key: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
  error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
  #[serde(rename = "type")]
  kind: Option<String>,
  code: Option<String>,
  decline_code: Option<String>,
  message: Option<String>,
  payment_intent: Option<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
  id: String,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
  id: String,
  client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
  id: String,
  status: String,
  amount: i64,
  currency: String,
  customer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
  id: String,
  status: String,
  current_period_end: Option<i64>,
  latest_invoice: Option<InvoiceResponse>,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
  payment_intent: Option<IntentResponse>,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
  invoice_settings: Option<InvoiceSettings>,
}

#[derive(Debug, Deserialize)]
struct InvoiceSettings {
  default_payment_method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodList {
  data: Vec<PaymentMethodResponse>,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodResponse {
  id: String,
  #[serde(rename = "type")]
  kind: String,
}

fn map_intent_status(raw: &str) -> GatewayPaymentStatus {
  match raw {
    "succeeded" => GatewayPaymentStatus::Succeeded,
    "canceled" => GatewayPaymentStatus::Canceled,
    "requires_payment_method" => GatewayPaymentStatus::Failed,
    _ => GatewayPaymentStatus::Processing,
  }
}

fn map_transport_error(err: reqwest::Error, operation: &str) -> GatewayError {
  if err.is_timeout() {
    GatewayError::Timeout(operation.to_string())
  } else if err.is_decode() {
    GatewayError::Decode(err.to_string())
  } else {
    GatewayError::Unavailable(format!("{}: {}", operation, err))
  }
}

fn map_api_error(status: StatusCode, body: &str) -> GatewayError {
  let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
  let message = parsed
    .as_ref()
    .and_then(|e| e.message.clone())
    .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

  if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
    return GatewayError::Unavailable(message);
  }
  match parsed {
    Some(err) if status == StatusCode::PAYMENT_REQUIRED || err.kind.as_deref() == Some("card_error") => {
      GatewayError::Declined {
        code: err
          .decline_code
          .or(err.code)
          .unwrap_or_else(|| "card_declined".to_string()),
        message,
        payment_id: err.payment_intent.map(|pi| pi.id),
      }
    }
    _ => GatewayError::Rejected(message),
  }
}

impl StripeGateway {
  pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
    let http = Client::builder()
      .use_rustls_tls()
      .timeout(timeout)
      .build()
      .map_err(|e| GatewayError::Unavailable(format!("building HTTP client: {}", e)))?;
    Ok(Self {
      http,
      api_base: api_base.into(),
      secret_key: secret_key.into(),
    })
  }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    self
      .http
      .request(method, format!("{}{}", self.api_base, path))
      .bearer_auth(&self.secret_key)
  }

  async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, operation: &str) -> GatewayResult<T> {
    let response = builder.send().await.map_err(|e| map_transport_error(e, operation))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| map_transport_error(e, operation))?;
    if !status.is_success() {
      let err = map_api_error(status, &body);
      warn!(operation = operation, status = status.as_u16(), error = %err, "Processor call failed.");
      return Err(err);
    }
    serde_json::from_str::<T>(&body).map_err(|e| GatewayError::Decode(format!("{}: {}", operation, e)))
  }

  fn to_payment(pi: PaymentIntentResponse) -> GatewayPayment {
    GatewayPayment {
      status: map_intent_status(&pi.status),
      payment_id: pi.id,
      amount: pi.amount,
      currency: pi.currency.to_ascii_lowercase(),
      customer_id: pi.customer,
    }
  }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
  fn provider(&self) -> &'static str {
    "stripe"
  }

  #[instrument(name = "stripe::create_charge_intent", skip(self, request), fields(amount = request.amount))]
  async fn create_charge_intent(&self, request: ChargeIntentRequest) -> GatewayResult<ChargeIntent> {
    let mut form: Vec<(String, String)> = vec![
      ("amount".into(), request.amount.to_string()),
      ("currency".into(), request.currency.clone()),
      ("automatic_payment_methods[enabled]".into(), "true".into()),
    ];
    if let Some(customer) = &request.customer_id {
      form.push(("customer".into(), customer.clone()));
    }
    if request.save_payment_method {
      form.push(("setup_future_usage".into(), "off_session".into()));
    }
    for (k, v) in &request.metadata {
      form.push((format!("metadata[{}]", k), v.clone()));
    }
    let intent: IntentResponse = self
      .send(
        self.request(Method::POST, "/v1/payment_intents").form(&form),
        "create_charge_intent",
      )
      .await?;
    let client_secret = intent
      .client_secret
      .ok_or_else(|| GatewayError::Decode("payment intent without client_secret".to_string()))?;
    Ok(ChargeIntent {
      intent_id: intent.id,
      client_secret,
    })
  }

  async fn create_setup_intent(&self, customer_id: &str) -> GatewayResult<SetupIntent> {
    let form = [("customer", customer_id), ("usage", "off_session")];
    let intent: IntentResponse = self
      .send(self.request(Method::POST, "/v1/setup_intents").form(&form), "create_setup_intent")
      .await?;
    let client_secret = intent
      .client_secret
      .ok_or_else(|| GatewayError::Decode("setup intent without client_secret".to_string()))?;
    Ok(SetupIntent {
      setup_intent_id: intent.id,
      client_secret,
    })
  }

  #[instrument(name = "stripe::retrieve_payment", skip(self))]
  async fn retrieve_payment(&self, payment_id: &str) -> GatewayResult<GatewayPayment> {
    let pi: PaymentIntentResponse = self
      .send(
        self.request(Method::GET, &format!("/v1/payment_intents/{}", payment_id)),
        "retrieve_payment",
      )
      .await?;
    Ok(Self::to_payment(pi))
  }

  #[instrument(name = "stripe::create_customer", skip(self, profile), fields(user_id = %profile.user_id))]
  async fn create_customer(&self, profile: &CustomerProfile) -> GatewayResult<String> {
    let mut form: Vec<(&str, String)> = vec![("metadata[user_id]", profile.user_id.to_string())];
    if let Some(email) = &profile.email {
      form.push(("email", email.clone()));
    }
    if let Some(name) = &profile.name {
      form.push(("name", name.clone()));
    }
    let customer: IdOnly = self
      .send(self.request(Method::POST, "/v1/customers").form(&form), "create_customer")
      .await?;
    Ok(customer.id)
  }

  #[instrument(name = "stripe::create_subscription", skip(self))]
  async fn create_subscription(&self, customer_id: &str, price_ref: &str) -> GatewayResult<CreatedSubscription> {
    let form = [
      ("customer", customer_id),
      ("items[0][price]", price_ref),
      ("payment_behavior", "default_incomplete"),
      ("payment_settings[save_default_payment_method]", "on_subscription"),
      ("expand[]", "latest_invoice.payment_intent"),
    ];
    let sub: SubscriptionResponse = self
      .send(self.request(Method::POST, "/v1/subscriptions").form(&form), "create_subscription")
      .await?;
    let status = SubscriptionStatus::from_processor(&sub.status)
      .ok_or_else(|| GatewayError::Decode(format!("unknown subscription status '{}'", sub.status)))?;
    Ok(CreatedSubscription {
      subscription_id: sub.id,
      status,
      client_secret: sub
        .latest_invoice
        .and_then(|inv| inv.payment_intent)
        .and_then(|pi| pi.client_secret),
      current_period_end: sub.current_period_end,
    })
  }

  #[instrument(name = "stripe::charge_off_session", skip(self, charge), fields(amount = charge.amount, idempotency_key = %charge.idempotency_key))]
  async fn charge_off_session(&self, charge: OffSessionCharge) -> GatewayResult<GatewayPayment> {
    let mut form: Vec<(String, String)> = vec![
      ("amount".into(), charge.amount.to_string()),
      ("currency".into(), charge.currency.clone()),
      ("customer".into(), charge.customer_id.clone()),
      ("payment_method".into(), charge.payment_method_id.clone()),
      ("off_session".into(), "true".into()),
      ("confirm".into(), "true".into()),
    ];
    for (k, v) in &charge.metadata {
      form.push((format!("metadata[{}]", k), v.clone()));
    }
    let pi: PaymentIntentResponse = self
      .send(
        self
          .request(Method::POST, "/v1/payment_intents")
          .header("Idempotency-Key", &charge.idempotency_key)
          .form(&form),
        "charge_off_session",
      )
      .await?;
    debug!(payment_id = %pi.id, status = %pi.status, "Off-session charge answered.");
    Ok(Self::to_payment(pi))
  }

  #[instrument(name = "stripe::cancel_subscription", skip(self))]
  async fn cancel_subscription(&self, subscription_id: &str) -> GatewayResult<SubscriptionStatus> {
    let sub: SubscriptionResponse = self
      .send(
        self.request(Method::DELETE, &format!("/v1/subscriptions/{}", subscription_id)),
        "cancel_subscription",
      )
      .await?;
    Ok(SubscriptionStatus::from_processor(&sub.status).unwrap_or(SubscriptionStatus::Canceled))
  }

  async fn attach_payment_method(&self, customer_id: &str, payment_method_id: &str) -> GatewayResult<()> {
    let _: IdOnly = self
      .send(
        self
          .request(Method::POST, &format!("/v1/payment_methods/{}/attach", payment_method_id))
          .form(&[("customer", customer_id)]),
        "attach_payment_method",
      )
      .await?;
    let _: IdOnly = self
      .send(
        self
          .request(Method::POST, &format!("/v1/customers/{}", customer_id))
          .form(&[("invoice_settings[default_payment_method]", payment_method_id)]),
        "set_default_payment_method",
      )
      .await?;
    Ok(())
  }

  async fn list_payment_methods(&self, customer_id: &str) -> GatewayResult<Vec<SavedPaymentMethod>> {
    let customer: CustomerResponse = self
      .send(
        self.request(Method::GET, &format!("/v1/customers/{}", customer_id)),
        "retrieve_customer",
      )
      .await?;
    let default_id = customer.invoice_settings.and_then(|s| s.default_payment_method);
    let list: PaymentMethodList = self
      .send(
        self.request(Method::GET, &format!("/v1/customers/{}/payment_methods", customer_id)),
        "list_payment_methods",
      )
      .await?;
    Ok(
      list
        .data
        .into_iter()
        .map(|pm| SavedPaymentMethod {
          is_default: default_id.as_deref() == Some(pm.id.as_str()),
          id: pm.id,
          kind: pm.kind,
        })
        .collect(),
    )
  }
}
