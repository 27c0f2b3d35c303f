// storefront/src/web/handlers/payment_handlers.rs

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use storeledger_flow::{FlowContext, FlowOutcome};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::pipelines::contexts::{CartLine, CheckoutCtx, CheckoutInput};
use crate::state::AppState;
use crate::web::extractors::AuthenticatedUser;

/// Storefront product ids arrive as numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ProductRef {
  Number(i64),
  Text(String),
}

impl ProductRef {
  fn into_id(self) -> String {
    match self {
      ProductRef::Number(n) => n.to_string(),
      ProductRef::Text(s) => s,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct CartItemPayload {
  pub id: ProductRef,
  pub quantity: i32,
  pub price: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentRequest {
  pub payment_id: String,
  pub amount: i64,
  pub currency: Option<String>,
  pub status: String,
  #[serde(default)]
  pub cart_items: Vec<CartItemPayload>,
  pub subscription_id: Option<String>,
  pub emi_id: Option<Uuid>,
  pub period: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentResponse {
  pub order_id: Uuid,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subscription_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub emi_id: Option<Uuid>,
}

impl From<RecordPaymentRequest> for CheckoutInput {
  fn from(req: RecordPaymentRequest) -> Self {
    CheckoutInput {
      payment_id: req.payment_id.trim().to_string(),
      amount: req.amount,
      currency: req.currency,
      status: req.status,
      cart: req
        .cart_items
        .into_iter()
        .map(|item| CartLine {
          product_id: item.id.into_id(),
          quantity: item.quantity,
          unit_price: item.price,
        })
        .collect(),
      subscription_id: req.subscription_id.filter(|s| !s.trim().is_empty()),
      emi_id: req.emi_id,
      period: req.period,
    }
  }
}

#[instrument(
  name = "handler::record_payment",
  skip(app_state, auth_user, req_payload),
  fields(user_id = %auth_user.user_id, payment_id = %req_payload.payment_id)
)]
pub async fn record_payment_handler(
  app_state: web::Data<AppState>,
  auth_user: AuthenticatedUser,
  req_payload: web::Json<RecordPaymentRequest>,
) -> Result<HttpResponse, AppError> {
  let input = CheckoutInput::from(req_payload.into_inner());
  let ctx = FlowContext::new(CheckoutCtx::new(app_state.get_ref().clone(), auth_user.user_id, input));

  match app_state.flows.run(ctx.clone()).await {
    Ok(FlowOutcome::Completed) | Ok(FlowOutcome::Stopped) => {
      let guard = ctx.read();
      let order_id = guard.order_id.ok_or_else(|| {
        error!("Checkout flow finished without an order id.");
        AppError::Internal("Checkout finished without recording an order.".to_string())
      })?;
      let body = RecordPaymentResponse {
        order_id,
        subscription_id: guard.input.subscription_id.clone(),
        emi_id: guard.input.emi_id,
      };
      if guard.duplicate {
        info!(order_id = %order_id, "Duplicate payment submission answered with existing order.");
        Ok(HttpResponse::Ok().json(body))
      } else {
        Ok(HttpResponse::Created().json(body))
      }
    }
    Err(e) => {
      error!(error = %e, "Checkout flow failed.");
      Err(e)
    }
  }
}
