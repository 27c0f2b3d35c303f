// storefront/src/web/routes.rs

use actix_web::web;

use crate::errors::AppError;
use crate::web::handlers::{
  emi_handlers, health_handlers, order_handlers, payment_handlers, payment_method_handlers, subscription_handlers,
  webhook_handlers,
};

/// Mounts every route under `/api/v1`.
///
/// The webhook route takes `web::Bytes`, so no JSON extractor ever touches
/// its body before signature verification.
pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg
    .app_data(
      web::JsonConfig::default().error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .app_data(web::PathConfig::default().error_handler(|err, _req| AppError::Validation(err.to_string()).into()))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| AppError::Validation(err.to_string()).into()))
    .service(
      web::scope("/api/v1")
        .route("/health", web::get().to(health_handlers::health_check_handler))
        .route("/webhooks", web::post().to(webhook_handlers::webhook_handler))
        .route("/payments", web::post().to(payment_handlers::record_payment_handler))
        .service(
          web::scope("/subscriptions")
            .route("", web::post().to(subscription_handlers::create_subscription_handler))
            .route("", web::get().to(subscription_handlers::list_subscriptions_handler))
            .route(
              "/{subscription_id}/cancel",
              web::post().to(subscription_handlers::cancel_subscription_handler),
            ),
        )
        .service(
          web::scope("/emi-plans")
            .route("", web::post().to(emi_handlers::create_emi_plan_handler))
            .route("", web::get().to(emi_handlers::list_emi_plans_handler))
            .route("/{emi_id}/charge", web::post().to(emi_handlers::charge_emi_handler)),
        )
        .route(
          "/payment-methods",
          web::post().to(payment_method_handlers::attach_payment_method_handler),
        )
        .route("/orders", web::get().to(order_handlers::list_my_orders_handler))
        .service(
          web::scope("/admin/orders")
            .route("", web::get().to(order_handlers::admin_list_orders_handler))
            .route(
              "/{order_id}/status",
              web::patch().to(order_handlers::admin_update_order_status_handler),
            ),
        ),
    );
}
