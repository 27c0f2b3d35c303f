// storefront/tests/billing_services_tests.rs

mod common;

use common::*;
use serial_test::serial;
use storeledger::errors::AppError;
use storeledger::ledger::LedgerStore;
use storeledger::models::{BillingPeriod, SubscriptionStatus};
use storeledger::pipelines::contexts::SubscriptionCtx;
use storeledger::services::customers::{attach_default_payment_method, resolve_customer};
use storeledger::services::gateway::{preferred_payment_method, CustomerProfile, GatewayError, PaymentGateway};
use storeledger::services::subscriptions::cancel_subscription;
use storeledger_flow::{FlowContext, FlowOutcome};
use uuid::Uuid;

fn profile(user_id: Uuid) -> CustomerProfile {
  CustomerProfile {
    user_id,
    email: None,
    name: None,
  }
}

async fn subscribe(app: &TestApp, user_id: Uuid) -> SubscriptionCtx {
  let ctx = FlowContext::new(SubscriptionCtx::new(
    app.state.clone(),
    user_id,
    "price_monthly".to_string(),
    BillingPeriod::Monthly,
  ));
  let outcome = app.state.flows.run(ctx.clone()).await;
  assert!(matches!(outcome, Ok(FlowOutcome::Completed)), "subscription flow: {:?}", outcome.err());
  ctx.snapshot()
}

#[tokio::test]
#[serial]
async fn customer_is_created_once_per_user() {
  let app = test_app();
  let user_id = user();

  let first = resolve_customer(&app.state, &profile(user_id)).await.unwrap();
  let second = resolve_customer(&app.state, &profile(user_id)).await.unwrap();

  assert_eq!(first, second);
  assert_eq!(app.gateway.customers_created(), 1);
  let linked = app.ledger.find_customer(user_id).await.unwrap().unwrap();
  assert_eq!(linked.customer_id, first);
}

#[tokio::test]
#[serial]
async fn attached_method_becomes_the_default() {
  let app = test_app();
  let user_id = user();
  let customer_id = resolve_customer(&app.state, &profile(user_id)).await.unwrap();
  app.gateway.add_payment_method(&customer_id, card("pm_old"));

  attach_default_payment_method(&app.state, user_id, "pm_new").await.unwrap();

  let methods = app.gateway.list_payment_methods(&customer_id).await.unwrap();
  assert_eq!(methods.len(), 2);
  assert_eq!(preferred_payment_method(&methods).map(|m| m.id.as_str()), Some("pm_new"));
}

#[tokio::test]
#[serial]
async fn attach_requires_a_customer_and_a_method_id() {
  let app = test_app();

  let missing_customer = attach_default_payment_method(&app.state, user(), "pm_1").await;
  assert!(matches!(missing_customer, Err(AppError::NotFound(_))));

  let user_id = user();
  resolve_customer(&app.state, &profile(user_id)).await.unwrap();
  let empty = attach_default_payment_method(&app.state, user_id, "  ").await;
  assert!(matches!(empty, Err(AppError::Validation(_))));
}

#[tokio::test]
#[serial]
async fn subscription_flow_stores_processor_subscription() {
  let app = test_app();
  let user_id = user();

  let sub = subscribe(&app, user_id).await;
  let external_id = sub.subscription_id.clone().unwrap();
  assert!(sub.client_secret.is_some());
  assert_eq!(sub.status, Some(SubscriptionStatus::Incomplete));

  let stored = app.ledger.find_subscription_by_external_id(&external_id).await.unwrap().unwrap();
  assert_eq!(stored.user_id, user_id);
  assert_eq!(stored.period, BillingPeriod::Monthly);
  assert_eq!(app.ledger.list_subscriptions_for_user(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn blank_price_is_rejected_before_calling_the_processor() {
  let app = test_app();
  let ctx = FlowContext::new(SubscriptionCtx::new(
    app.state.clone(),
    user(),
    "   ".to_string(),
    BillingPeriod::Yearly,
  ));

  let outcome = app.state.flows.run(ctx).await;
  assert!(matches!(outcome, Err(AppError::Validation(_))));
  assert_eq!(app.gateway.customers_created(), 0);
}

#[tokio::test]
#[serial]
async fn cancel_is_terminal_and_owner_only() {
  let app = test_app();
  let owner = user();
  let external_id = subscribe(&app, owner).await.subscription_id.unwrap();

  let foreign = cancel_subscription(&app.state, user(), &external_id).await;
  assert!(matches!(foreign, Err(AppError::NotFound(_))));
  assert!(app.gateway.canceled_subscriptions().is_empty());

  let canceled = cancel_subscription(&app.state, owner, &external_id).await.unwrap();
  assert_eq!(canceled.status, SubscriptionStatus::Canceled);
  assert_eq!(app.gateway.canceled_subscriptions(), vec![external_id.clone()]);

  // A second cancel is answered from the ledger.
  let again = cancel_subscription(&app.state, owner, &external_id).await.unwrap();
  assert_eq!(again.status, SubscriptionStatus::Canceled);
  assert_eq!(app.gateway.canceled_subscriptions().len(), 1);
}

#[tokio::test]
#[serial]
async fn processor_failure_leaves_subscription_untouched() {
  let app = test_app();
  let owner = user();
  let external_id = subscribe(&app, owner).await.subscription_id.unwrap();
  app
    .gateway
    .fail_next("cancel_subscription", GatewayError::Unavailable("processor down".to_string()));

  let result = cancel_subscription(&app.state, owner, &external_id).await;
  assert!(matches!(result, Err(AppError::Gateway(GatewayError::Unavailable(_)))));
  let stored = app.ledger.find_subscription_by_external_id(&external_id).await.unwrap().unwrap();
  assert_eq!(stored.status, SubscriptionStatus::Incomplete);
}
