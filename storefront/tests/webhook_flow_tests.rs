// storefront/tests/webhook_flow_tests.rs

mod common;

use actix_web::web::Bytes;
use common::*;
use serial_test::serial;
use storeledger::config::{AppConfig, TrustMode};
use storeledger::errors::AppError;
use storeledger::ledger::LedgerStore;
use storeledger::models::{OrderStatus, PaymentStatus, SubscriptionStatus};
use storeledger::pipelines::contexts::{CheckoutCtx, WebhookCtx, WebhookDisposition};
use storeledger_flow::FlowContext;
use uuid::Uuid;

fn webhook_mode_app() -> TestApp {
  let mut config = AppConfig::for_tests();
  config.trust_mode = TrustMode::Webhook;
  test_app_with(config)
}

async fn deliver(app: &TestApp, body: Vec<u8>) -> Result<WebhookDisposition, AppError> {
  let header = sign(&body);
  deliver_with_header(app, body, Some(header)).await
}

async fn deliver_with_header(app: &TestApp, body: Vec<u8>, header: Option<String>) -> Result<WebhookDisposition, AppError> {
  let ctx = FlowContext::new(WebhookCtx::new(app.state.clone(), Bytes::from(body), header));
  app.state.flows.run(ctx.clone()).await?;
  let disposition = ctx.read().disposition;
  Ok(disposition)
}

async fn pending_order(app: &TestApp, user_id: Uuid, payment_id: &str) -> Uuid {
  let ctx = FlowContext::new(CheckoutCtx::new(
    app.state.clone(),
    user_id,
    checkout_input(payment_id, 1000, vec![line("1", 2, 500)]),
  ));
  app.state.flows.run(ctx.clone()).await.expect("checkout");
  let order_id = ctx.read().order_id;
  order_id.expect("order id")
}

#[tokio::test]
#[serial]
async fn payment_succeeded_promotes_pending_order_and_replay_is_noop() {
  let app = webhook_mode_app();
  let order_id = pending_order(&app, user(), "pay_w1").await;
  let body = payment_event("evt_1", "payment_intent.succeeded", "pay_w1", 1000, 1_700_000_000);

  assert_eq!(deliver(&app, body.clone()).await.unwrap(), WebhookDisposition::Applied);
  assert_eq!(deliver(&app, body).await.unwrap(), WebhookDisposition::Replayed);

  let order = app.ledger.get_order(order_id).await.unwrap().unwrap();
  assert_eq!(order.order.status, OrderStatus::Paid);
  let payment = app.ledger.find_payment_by_external_id("pay_w1").await.unwrap().unwrap();
  assert_eq!(payment.status, PaymentStatus::Succeeded);
  assert_eq!(app.ledger.payment_count(), 1);
}

#[tokio::test]
#[serial]
async fn payment_failed_cancels_pending_order_and_late_success_is_ignored() {
  let app = webhook_mode_app();
  let order_id = pending_order(&app, user(), "pay_w2").await;

  let failed = payment_event("evt_f", "payment_intent.payment_failed", "pay_w2", 1000, 1_700_000_000);
  assert_eq!(deliver(&app, failed).await.unwrap(), WebhookDisposition::Applied);
  let late = payment_event("evt_s", "payment_intent.succeeded", "pay_w2", 1000, 1_700_000_100);
  assert_eq!(deliver(&app, late).await.unwrap(), WebhookDisposition::Ignored);

  let order = app.ledger.get_order(order_id).await.unwrap().unwrap();
  assert_eq!(order.order.status, OrderStatus::Canceled);
  let payment = app.ledger.find_payment_by_external_id("pay_w2").await.unwrap().unwrap();
  assert_eq!(payment.status, PaymentStatus::Failed);
}

#[tokio::test]
#[serial]
async fn notification_before_checkout_is_applied_when_order_is_recorded() {
  let app = webhook_mode_app();
  let body = payment_event("evt_early", "payment_intent.succeeded", "pay_early", 1000, 1_700_000_000);
  assert_eq!(deliver(&app, body).await.unwrap(), WebhookDisposition::Deferred);
  assert_eq!(app.ledger.unmatched_count(), 1);

  let order_id = pending_order(&app, user(), "pay_early").await;
  let order = app.ledger.get_order(order_id).await.unwrap().unwrap();
  assert_eq!(order.order.status, OrderStatus::Paid);
  assert_eq!(app.ledger.unmatched_count(), 0);
}

#[tokio::test]
#[serial]
async fn canceled_subscription_ignores_stale_updates() {
  let app = test_app();
  let user_id = user();
  app.ledger.link_customer(user_id, "cus_9").await.unwrap();

  let deleted = subscription_event(
    "evt_del",
    "customer.subscription.deleted",
    "sub_9",
    "cus_9",
    "canceled",
    1_700_002_000,
  );
  assert_eq!(deliver(&app, deleted).await.unwrap(), WebhookDisposition::Applied);

  let stale = subscription_event(
    "evt_old",
    "customer.subscription.updated",
    "sub_9",
    "cus_9",
    "active",
    1_700_001_000,
  );
  assert_eq!(deliver(&app, stale).await.unwrap(), WebhookDisposition::Ignored);

  let newer = subscription_event(
    "evt_new",
    "customer.subscription.updated",
    "sub_9",
    "cus_9",
    "active",
    1_700_003_000,
  );
  assert_eq!(deliver(&app, newer).await.unwrap(), WebhookDisposition::Ignored);

  let sub = app.ledger.find_subscription_by_external_id("sub_9").await.unwrap().unwrap();
  assert_eq!(sub.status, SubscriptionStatus::Canceled);
  assert_eq!(sub.user_id, user_id);
}

#[tokio::test]
#[serial]
async fn subscription_updates_apply_last_writer_wins() {
  let app = test_app();
  app.ledger.link_customer(user(), "cus_lww").await.unwrap();

  let newer = subscription_event(
    "evt_2",
    "customer.subscription.updated",
    "sub_lww",
    "cus_lww",
    "past_due",
    1_700_002_000,
  );
  let older = subscription_event(
    "evt_1",
    "customer.subscription.updated",
    "sub_lww",
    "cus_lww",
    "active",
    1_700_001_000,
  );
  deliver(&app, newer).await.unwrap();
  deliver(&app, older).await.unwrap();

  let sub = app.ledger.find_subscription_by_external_id("sub_lww").await.unwrap().unwrap();
  assert_eq!(sub.status, SubscriptionStatus::PastDue);
}

#[tokio::test]
#[serial]
async fn bad_signature_mutates_nothing() {
  let app = webhook_mode_app();
  pending_order(&app, user(), "pay_sig").await;
  let body = payment_event("evt_sig", "payment_intent.succeeded", "pay_sig", 1000, 1_700_000_000);
  let forged = storeledger::services::gateway::webhook::signature_header(&body, "whsec_wrong", chrono::Utc::now().timestamp());

  let result = deliver_with_header(&app, body.clone(), Some(forged)).await;
  assert!(matches!(result, Err(AppError::Signature(_))));
  let missing = deliver_with_header(&app, body, None).await;
  assert!(matches!(missing, Err(AppError::Signature(_))));

  assert!(!app.ledger.is_event_processed("evt_sig").await.unwrap());
  let payment = app.ledger.find_payment_by_external_id("pay_sig").await.unwrap().unwrap();
  assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
#[serial]
async fn events_for_unknown_customers_and_types_are_acknowledged() {
  let app = test_app();
  let orphan = subscription_event(
    "evt_orphan",
    "customer.subscription.updated",
    "sub_x",
    "cus_unknown",
    "active",
    1_700_000_000,
  );
  assert_eq!(deliver(&app, orphan).await.unwrap(), WebhookDisposition::Ignored);
  assert!(app.ledger.find_subscription_by_external_id("sub_x").await.unwrap().is_none());

  let other = br#"{"id":"evt_inv","type":"invoice.finalized","created":1700000000,"data":{"object":{"id":"in_1"}}}"#.to_vec();
  assert_eq!(deliver(&app, other).await.unwrap(), WebhookDisposition::Ignored);
  assert!(app.ledger.is_event_processed("evt_inv").await.unwrap());
}

#[tokio::test]
#[serial]
async fn first_event_after_checkout_sets_linked_subscription_status() {
  let app = webhook_mode_app();
  let user_id = user();
  let mut input = checkout_input("pay_sub_x", 1000, vec![]);
  input.subscription_id = Some("sub_x".to_string());
  let ctx = FlowContext::new(CheckoutCtx::new(app.state.clone(), user_id, input));
  app.state.flows.run(ctx).await.expect("checkout");
  let linked = app.ledger.find_subscription_by_external_id("sub_x").await.unwrap().unwrap();
  assert_eq!(linked.status, SubscriptionStatus::Incomplete);

  // Emitted a few seconds before our checkout request reached the ledger.
  let created = chrono::Utc::now().timestamp() - 5;
  let active = subscription_event(
    "evt_sub_x",
    "customer.subscription.updated",
    "sub_x",
    "cus_x",
    "active",
    created,
  );
  assert_eq!(deliver(&app, active).await.unwrap(), WebhookDisposition::Applied);

  let sub = app.ledger.find_subscription_by_external_id("sub_x").await.unwrap().unwrap();
  assert_eq!(sub.status, SubscriptionStatus::Active);
  assert_eq!(sub.user_id, user_id);
}
