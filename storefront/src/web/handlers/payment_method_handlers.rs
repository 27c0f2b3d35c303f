// storefront/src/web/handlers/payment_method_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::instrument;

use crate::errors::AppError;
use crate::services::customers::attach_default_payment_method;
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachPaymentMethodRequest {
  pub payment_method_id: String,
}

#[instrument(name = "handler::attach_payment_method", skip(app_state, auth_user, req_payload), fields(user_id = %auth_user.user_id))]
pub async fn attach_payment_method_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  req_payload: web::Json<AttachPaymentMethodRequest>,
) -> Result<HttpResponse, AppError> {
  attach_default_payment_method(app_state.get_ref(), auth_user.user_id, req_payload.payment_method_id.trim()).await?;
  Ok(HttpResponse::NoContent().finish())
}
