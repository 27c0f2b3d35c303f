// storefront/src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use storeledger_flow::{FlowContext, FlowOutcome};
use tracing::{error, info, instrument};

use crate::errors::AppError;
use crate::pipelines::contexts::{WebhookCtx, WebhookDisposition};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Takes the body as raw bytes: the signature covers the exact payload received.
#[instrument(name = "handler::webhook", skip(app_state, req, body), fields(bytes = body.len()))]
pub async fn webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let signature = req
    .headers()
    .get(SIGNATURE_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string);
  let ctx = FlowContext::new(WebhookCtx::new(app_state.get_ref().clone(), body, signature));

  match app_state.flows.run(ctx.clone()).await {
    Ok(FlowOutcome::Completed) | Ok(FlowOutcome::Stopped) => {
      let guard = ctx.read();
      let disposition = match guard.disposition {
        WebhookDisposition::Applied => "applied",
        WebhookDisposition::Replayed => "replayed",
        WebhookDisposition::Ignored => "ignored",
        WebhookDisposition::Deferred => "deferred",
      };
      let event_id = guard.event.as_ref().map(|e| e.id.clone());
      info!(event_id = ?event_id, disposition, "Webhook acknowledged.");
      Ok(HttpResponse::Ok().json(json!({ "received": true, "disposition": disposition })))
    }
    // Any failure is a non-2xx so the processor redelivers.
    Err(e) => {
      error!(error = %e, "Webhook processing failed.");
      Err(e)
    }
  }
}
