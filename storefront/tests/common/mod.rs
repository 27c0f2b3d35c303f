// storefront/tests/common/mod.rs
#![allow(dead_code)]

use chrono::Utc;
use once_cell::sync::Lazy;
use std::sync::Arc;
use storeledger::config::AppConfig;
use storeledger::ledger::InMemoryLedger;
use storeledger::pipelines::contexts::{CartLine, CheckoutInput};
use storeledger::services::gateway::webhook::signature_header;
use storeledger::services::gateway::{MockGateway, SavedPaymentMethod};
use storeledger::state::AppState;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const INTERNAL_TOKEN: &str = "internal-test-token";

static TRACING: Lazy<()> = Lazy::new(|| {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING);
}

pub struct TestApp {
  pub state: AppState,
  pub ledger: Arc<InMemoryLedger>,
  pub gateway: Arc<MockGateway>,
}

pub fn test_app() -> TestApp {
  test_app_with(AppConfig::for_tests())
}

pub fn test_app_with(config: AppConfig) -> TestApp {
  setup_tracing();
  let ledger = Arc::new(InMemoryLedger::new());
  let gateway = Arc::new(MockGateway::new());
  let state = AppState::new(config, ledger.clone(), gateway.clone());
  TestApp { state, ledger, gateway }
}

pub fn line(id: &str, quantity: i32, unit_price: i64) -> CartLine {
  CartLine {
    product_id: id.to_string(),
    quantity,
    unit_price,
  }
}

pub fn checkout_input(payment_id: &str, amount: i64, cart: Vec<CartLine>) -> CheckoutInput {
  CheckoutInput {
    payment_id: payment_id.to_string(),
    amount,
    currency: Some("inr".to_string()),
    status: "succeeded".to_string(),
    cart,
    subscription_id: None,
    emi_id: None,
    period: None,
  }
}

pub fn card(id: &str) -> SavedPaymentMethod {
  SavedPaymentMethod {
    id: id.to_string(),
    kind: "card".to_string(),
    is_default: false,
  }
}

pub fn user() -> Uuid {
  Uuid::new_v4()
}

pub fn payment_event(event_id: &str, event_type: &str, payment_id: &str, amount: i64, created: i64) -> Vec<u8> {
  format!(
    r#"{{"id":"{}","type":"{}","created":{},"data":{{"object":{{"id":"{}","amount":{},"currency":"inr"}}}}}}"#,
    event_id, event_type, created, payment_id, amount
  )
  .into_bytes()
}

pub fn subscription_event(
  event_id: &str,
  event_type: &str,
  subscription_id: &str,
  customer_id: &str,
  status: &str,
  created: i64,
) -> Vec<u8> {
  format!(
    r#"{{"id":"{}","type":"{}","created":{},"data":{{"object":{{"id":"{}","customer":"{}","status":"{}","current_period_end":{},"items":{{"data":[{{"price":{{"recurring":{{"interval":"month"}}}}}}]}}}}}}}}"#,
    event_id,
    event_type,
    created,
    subscription_id,
    customer_id,
    status,
    created + 30 * 24 * 3600
  )
  .into_bytes()
}

/// A valid signature header for `body`, timestamped now.
pub fn sign(body: &[u8]) -> String {
  signature_header(body, WEBHOOK_SECRET, Utc::now().timestamp())
}
