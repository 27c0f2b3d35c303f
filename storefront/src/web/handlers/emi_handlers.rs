// storefront/src/web/handlers/emi_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use storeledger_flow::{FlowContext, FlowOutcome};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::pipelines::common_steps::normalize_currency;
use crate::pipelines::contexts::EmiCtx;
use crate::services::installments::{charge_installment, ChargeOutcome};
use crate::state::AppState;
use crate::web::extractors::{AuthenticatedUser, InternalCaller};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmiRequest {
  pub total_amount: i64,
  pub months: i32,
  pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmiResponse {
  pub client_secret: String,
  pub setup_client_secret: String,
  pub monthly_amount: i64,
  pub emi_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct EmiListQuery {
  pub status: Option<String>,
}

#[instrument(name = "handler::create_emi_plan", skip(app_state, auth_user, req_payload), fields(user_id = %auth_user.user_id))]
pub async fn create_emi_plan_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  req_payload: web::Json<CreateEmiRequest>,
) -> Result<HttpResponse, AppError> {
  let req = req_payload.into_inner();
  let currency = normalize_currency(req.currency.as_deref().unwrap_or(&app_state.config.default_currency))?;
  let ctx = FlowContext::new(EmiCtx::new(
    app_state.get_ref().clone(),
    auth_user.user_id,
    req.total_amount,
    req.months,
    currency,
  ));

  match app_state.flows.run(ctx.clone()).await {
    Ok(FlowOutcome::Completed) => {
      let guard = ctx.read();
      let (Some(charge), Some(setup)) = (guard.charge_intent.as_ref(), guard.setup_intent.as_ref()) else {
        return Err(AppError::Internal("EMI flow finished without intents.".to_string()));
      };
      Ok(HttpResponse::Created().json(CreateEmiResponse {
        client_secret: charge.client_secret.clone(),
        setup_client_secret: setup.client_secret.clone(),
        monthly_amount: guard.installment_amount,
        emi_id: guard.plan_id,
      }))
    }
    Ok(FlowOutcome::Stopped) => Err(AppError::Internal("EMI flow stopped unexpectedly.".to_string())),
    Err(e) => {
      error!(error = %e, "EMI flow failed.");
      Err(e)
    }
  }
}

#[instrument(name = "handler::list_pending_emi_plans", skip(app_state, _caller))]
pub async fn list_emi_plans_handler(
  app_state: web::Data<AppState>,
  _caller: InternalCaller,
  query: web::Query<EmiListQuery>,
) -> Result<HttpResponse, AppError> {
  match query.status.as_deref() {
    None | Some("pending") => {}
    Some(other) => return Err(AppError::Validation(format!("Unsupported status filter '{}'.", other))),
  }
  let plans = app_state.ledger.list_chargeable_emi_plans().await?;
  Ok(HttpResponse::Ok().json(plans))
}

#[instrument(name = "handler::charge_emi_installment", skip(app_state, _caller), fields(emi_plan_id = %path))]
pub async fn charge_emi_handler(
  app_state: web::Data<AppState>,
  _caller: InternalCaller,
  path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let outcome = charge_installment(app_state.get_ref(), path.into_inner(), Utc::now()).await?;
  let response = match &outcome {
    ChargeOutcome::Failed { retryable: true, .. } => HttpResponse::ServiceUnavailable().json(&outcome),
    ChargeOutcome::Failed { retryable: false, .. } => HttpResponse::PaymentRequired().json(&outcome),
    ChargeOutcome::Blocked { .. } | ChargeOutcome::NotActive => HttpResponse::Conflict().json(&outcome),
    ChargeOutcome::Processing { .. } => HttpResponse::Accepted().json(&outcome),
    _ => HttpResponse::Ok().json(&outcome),
  };
  Ok(response)
}
