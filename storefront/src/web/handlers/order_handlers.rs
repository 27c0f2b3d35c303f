// storefront/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::OrderStatus;
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;

const DEFAULT_ADMIN_LIMIT: i64 = 100;
const MAX_ADMIN_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct AdminOrdersQuery {
  pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
  pub status: String,
}

#[instrument(name = "handler::list_my_orders", skip(app_state, auth_user), fields(user_id = %auth_user.user_id))]
pub async fn list_my_orders_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
  let orders = app_state.ledger.list_orders_for_user(auth_user.user_id).await?;
  Ok(HttpResponse::Ok().json(orders))
}

#[instrument(name = "handler::admin_list_orders", skip(app_state, auth_user), fields(user_id = %auth_user.user_id))]
pub async fn admin_list_orders_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  query: web::Query<AdminOrdersQuery>,
) -> Result<HttpResponse, AppError> {
  auth_user.require_admin()?;
  let limit = query.limit.unwrap_or(DEFAULT_ADMIN_LIMIT).clamp(1, MAX_ADMIN_LIMIT);
  let orders = app_state.ledger.list_all_orders(limit).await?;
  Ok(HttpResponse::Ok().json(orders))
}

#[instrument(
  name = "handler::admin_update_order_status",
  skip(app_state, auth_user, req_payload),
  fields(user_id = %auth_user.user_id, order_id = %path)
)]
pub async fn admin_update_order_status_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  path: web::Path<Uuid>,
  req_payload: web::Json<UpdateOrderStatusRequest>,
) -> Result<HttpResponse, AppError> {
  auth_user.require_admin()?;
  let next = req_payload
    .status
    .trim()
    .to_ascii_lowercase()
    .parse::<OrderStatus>()
    .map_err(AppError::Validation)?;
  let order = app_state.ledger.transition_order_status(path.into_inner(), next).await?;
  info!(status = order.status.as_str(), "Order status updated by admin.");
  Ok(HttpResponse::Ok().json(order))
}
