// storefront/src/web/handlers/subscription_handlers.rs

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use storeledger_flow::{FlowContext, FlowOutcome};
use tracing::{error, instrument};

use crate::errors::AppError;
use crate::models::{BillingPeriod, SubscriptionStatus};
use crate::pipelines::contexts::SubscriptionCtx;
use crate::services::subscriptions::cancel_subscription;
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
  pub price_ref: String,
  pub period: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionResponse {
  pub subscription_id: String,
  pub client_secret: Option<String>,
  pub status: SubscriptionStatus,
}

#[instrument(name = "handler::create_subscription", skip(app_state, auth_user, req_payload), fields(user_id = %auth_user.user_id))]
pub async fn create_subscription_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  req_payload: web::Json<CreateSubscriptionRequest>,
) -> Result<HttpResponse, AppError> {
  let req = req_payload.into_inner();
  let period = match req.period.as_deref() {
    Some(raw) => raw.parse::<BillingPeriod>().map_err(AppError::Validation)?,
    None => BillingPeriod::Monthly,
  };
  let ctx = FlowContext::new(SubscriptionCtx::new(
    app_state.get_ref().clone(),
    auth_user.user_id,
    req.price_ref.trim().to_string(),
    period,
  ));

  match app_state.flows.run(ctx.clone()).await {
    Ok(FlowOutcome::Completed) => {
      let guard = ctx.read();
      let (Some(subscription_id), Some(status)) = (guard.subscription_id.clone(), guard.status) else {
        return Err(AppError::Internal("Subscription flow finished without a subscription.".to_string()));
      };
      Ok(HttpResponse::Created().json(CreateSubscriptionResponse {
        subscription_id,
        client_secret: guard.client_secret.clone(),
        status,
      }))
    }
    Ok(FlowOutcome::Stopped) => Err(AppError::Internal("Subscription flow stopped unexpectedly.".to_string())),
    Err(e) => {
      error!(error = %e, "Subscription flow failed.");
      Err(e)
    }
  }
}

#[instrument(name = "handler::list_subscriptions", skip(app_state, auth_user), fields(user_id = %auth_user.user_id))]
pub async fn list_subscriptions_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
  let subs = app_state.ledger.list_subscriptions_for_user(auth_user.user_id).await?;
  Ok(HttpResponse::Ok().json(subs))
}

#[instrument(name = "handler::cancel_subscription", skip(app_state, auth_user), fields(user_id = %auth_user.user_id))]
pub async fn cancel_subscription_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let sub = cancel_subscription(app_state.get_ref(), auth_user.user_id, &path.into_inner()).await?;
  Ok(HttpResponse::Ok().json(sub))
}
