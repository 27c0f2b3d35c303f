// storefront/tests/http_api_tests.rs

mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use common::*;
use serde_json::{json, Value};
use serial_test::serial;
use storeledger::ledger::LedgerStore;
use storeledger::services::gateway::GatewayPaymentStatus;
use storeledger::web::configure_app_routes;

macro_rules! init_app {
  ($app:expr) => {
    test::init_service(
      App::new()
        .app_data(web::Data::new($app.state.clone()))
        .configure(configure_app_routes),
    )
    .await
  };
}

#[actix_web::test]
#[serial]
async fn health_reports_gateway() {
  let app = test_app();
  let service = init_app!(app);
  let body: Value = test::call_and_read_body_json(&service, test::TestRequest::get().uri("/api/v1/health").to_request()).await;
  assert_eq!(body["status"], "ok");
  assert_eq!(body["gateway"], "mock");
}

#[actix_web::test]
#[serial]
async fn record_payment_creates_then_echoes_order() {
  let app = test_app();
  app
    .gateway
    .set_payment("pay_http", GatewayPaymentStatus::Succeeded, 1000, "inr");
  let service = init_app!(app);
  let user_id = user().to_string();
  let payload = json!({
    "paymentId": "pay_http",
    "amount": 1000,
    "currency": "inr",
    "status": "succeeded",
    "cartItems": [{ "id": 1, "quantity": 2, "price": 500 }]
  });

  let first = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/payments")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(&payload)
      .to_request(),
  )
  .await;
  assert_eq!(first.status(), StatusCode::CREATED);
  let first_body: Value = test::read_body_json(first).await;

  let second = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/payments")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(&payload)
      .to_request(),
  )
  .await;
  assert_eq!(second.status(), StatusCode::OK);
  let second_body: Value = test::read_body_json(second).await;

  assert_eq!(first_body["orderId"], second_body["orderId"]);
  assert!(first_body.get("emiId").is_none());
  assert_eq!(app.ledger.order_count(), 1);
}

#[actix_web::test]
#[serial]
async fn error_kinds_map_to_status_codes() {
  let app = test_app();
  app
    .gateway
    .set_payment("pay_mismatch", GatewayPaymentStatus::Succeeded, 900, "inr");
  let service = init_app!(app);
  let user_id = user().to_string();

  let unauthenticated = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/payments")
      .set_json(json!({ "paymentId": "p", "amount": 1, "status": "succeeded", "cartItems": [] }))
      .to_request(),
  )
  .await;
  assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

  let malformed = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/payments")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({ "amount": "lots" }))
      .to_request(),
  )
  .await;
  assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

  let mismatch = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/payments")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({
        "paymentId": "pay_mismatch",
        "amount": 900,
        "status": "succeeded",
        "cartItems": [{ "id": "sku-1", "quantity": 2, "price": 500 }]
      }))
      .to_request(),
  )
  .await;
  assert_eq!(mismatch.status(), StatusCode::UNPROCESSABLE_ENTITY);
  let body: Value = test::read_body_json(mismatch).await;
  assert_eq!(body["error"], "amount_mismatch");

  let bad_terms = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/emi-plans")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({ "totalAmount": 100000, "months": 2500 }))
      .to_request(),
  )
  .await;
  assert_eq!(bad_terms.status(), StatusCode::UNPROCESSABLE_ENTITY);

  let oversized = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/emi-plans")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({ "totalAmount": i64::MAX, "months": 3 }))
      .to_request(),
  )
  .await;
  assert_eq!(oversized.status(), StatusCode::BAD_REQUEST);
  let body: Value = test::read_body_json(oversized).await;
  assert_eq!(body["error"], "validation_error");
}

#[actix_web::test]
#[serial]
async fn emi_plan_creation_returns_client_secrets() {
  let app = test_app();
  let service = init_app!(app);
  let body: Value = test::call_and_read_body_json(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/emi-plans")
      .insert_header(("X-User-ID", user().to_string().as_str()))
      .set_json(json!({ "totalAmount": 100000, "months": 3 }))
      .to_request(),
  )
  .await;
  assert_eq!(body["monthlyAmount"], 33333);
  assert!(body["clientSecret"].as_str().is_some());
  assert!(body["setupClientSecret"].as_str().is_some());
  assert!(body["emiId"].as_str().is_some());
}

#[actix_web::test]
#[serial]
async fn internal_routes_require_token() {
  let app = test_app();
  let service = init_app!(app);

  let denied = test::call_service(
    &service,
    test::TestRequest::get().uri("/api/v1/emi-plans?status=pending").to_request(),
  )
  .await;
  assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

  let allowed = test::call_service(
    &service,
    test::TestRequest::get()
      .uri("/api/v1/emi-plans?status=pending")
      .insert_header(("X-Internal-Token", INTERNAL_TOKEN))
      .to_request(),
  )
  .await;
  assert_eq!(allowed.status(), StatusCode::OK);

  let missing_plan = test::call_service(
    &service,
    test::TestRequest::post()
      .uri(&format!("/api/v1/emi-plans/{}/charge", uuid::Uuid::new_v4()))
      .insert_header(("X-Internal-Token", INTERNAL_TOKEN))
      .to_request(),
  )
  .await;
  assert_eq!(missing_plan.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
#[serial]
async fn webhook_endpoint_verifies_raw_body() {
  let app = test_app();
  let service = init_app!(app);
  let body = payment_event("evt_http", "payment_intent.succeeded", "pay_none", 1000, 1_700_000_000);

  let rejected = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/webhooks")
      .insert_header(("Stripe-Signature", "t=1,v1=00"))
      .set_payload(body.clone())
      .to_request(),
  )
  .await;
  assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

  let accepted: Value = test::call_and_read_body_json(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/webhooks")
      .insert_header(("Stripe-Signature", sign(&body)))
      .insert_header(("Content-Type", "application/json"))
      .set_payload(body)
      .to_request(),
  )
  .await;
  assert_eq!(accepted["disposition"], "deferred");
  assert!(app.ledger.is_event_processed("evt_http").await.unwrap());
}

#[actix_web::test]
#[serial]
async fn admin_routes_enforce_role_and_transitions() {
  let app = test_app();
  app
    .gateway
    .set_payment("pay_admin", GatewayPaymentStatus::Succeeded, 1000, "inr");
  let service = init_app!(app);
  let user_id = user().to_string();

  let created: Value = test::call_and_read_body_json(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/payments")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({
        "paymentId": "pay_admin",
        "amount": 1000,
        "status": "succeeded",
        "cartItems": [{ "id": 3, "quantity": 1, "price": 1000 }]
      }))
      .to_request(),
  )
  .await;
  let order_id = created["orderId"].as_str().unwrap().to_string();
  let status_uri = format!("/api/v1/admin/orders/{}/status", order_id);

  let forbidden = test::call_service(
    &service,
    test::TestRequest::patch()
      .uri(&status_uri)
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({ "status": "shipped" }))
      .to_request(),
  )
  .await;
  assert_eq!(forbidden.status(), StatusCode::UNAUTHORIZED);

  let shipped = test::call_service(
    &service,
    test::TestRequest::patch()
      .uri(&status_uri)
      .insert_header(("X-User-ID", user_id.as_str()))
      .insert_header(("X-Admin", "true"))
      .set_json(json!({ "status": "shipped" }))
      .to_request(),
  )
  .await;
  assert_eq!(shipped.status(), StatusCode::OK);

  let backwards = test::call_service(
    &service,
    test::TestRequest::patch()
      .uri(&status_uri)
      .insert_header(("X-User-ID", user_id.as_str()))
      .insert_header(("X-Admin", "true"))
      .set_json(json!({ "status": "pending" }))
      .to_request(),
  )
  .await;
  assert_eq!(backwards.status(), StatusCode::CONFLICT);

  let mine: Value = test::call_and_read_body_json(
    &service,
    test::TestRequest::get()
      .uri("/api/v1/orders")
      .insert_header(("X-User-ID", user_id.as_str()))
      .to_request(),
  )
  .await;
  assert_eq!(mine.as_array().map(|a| a.len()), Some(1));
  assert_eq!(mine[0]["status"], "shipped");
}

#[actix_web::test]
#[serial]
async fn subscription_lifecycle_over_http() {
  let app = test_app();
  let service = init_app!(app);
  let user_id = user().to_string();

  let created = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/subscriptions")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({ "priceRef": "price_monthly", "period": "monthly" }))
      .to_request(),
  )
  .await;
  assert_eq!(created.status(), StatusCode::CREATED);
  let created: Value = test::read_body_json(created).await;
  let subscription_id = created["subscriptionId"].as_str().unwrap().to_string();
  assert_eq!(created["status"], "incomplete");

  let listed: Value = test::call_and_read_body_json(
    &service,
    test::TestRequest::get()
      .uri("/api/v1/subscriptions")
      .insert_header(("X-User-ID", user_id.as_str()))
      .to_request(),
  )
  .await;
  assert_eq!(listed.as_array().map(|a| a.len()), Some(1));
  assert_eq!(listed[0]["externalId"], subscription_id.as_str());

  let stranger = user().to_string();
  let foreign = test::call_service(
    &service,
    test::TestRequest::post()
      .uri(&format!("/api/v1/subscriptions/{}/cancel", subscription_id))
      .insert_header(("X-User-ID", stranger.as_str()))
      .to_request(),
  )
  .await;
  assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

  let canceled: Value = test::call_and_read_body_json(
    &service,
    test::TestRequest::post()
      .uri(&format!("/api/v1/subscriptions/{}/cancel", subscription_id))
      .insert_header(("X-User-ID", user_id.as_str()))
      .to_request(),
  )
  .await;
  assert_eq!(canceled["status"], "canceled");
}

#[actix_web::test]
#[serial]
async fn payment_method_attach_needs_existing_customer() {
  let app = test_app();
  let service = init_app!(app);
  let user_id = user().to_string();

  let unknown = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/payment-methods")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({ "paymentMethodId": "pm_1" }))
      .to_request(),
  )
  .await;
  assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

  let plan = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/emi-plans")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({ "totalAmount": 30000, "months": 3 }))
      .to_request(),
  )
  .await;
  assert_eq!(plan.status(), StatusCode::CREATED);

  let attached = test::call_service(
    &service,
    test::TestRequest::post()
      .uri("/api/v1/payment-methods")
      .insert_header(("X-User-ID", user_id.as_str()))
      .set_json(json!({ "paymentMethodId": "pm_1" }))
      .to_request(),
  )
  .await;
  assert_eq!(attached.status(), StatusCode::NO_CONTENT);
}
