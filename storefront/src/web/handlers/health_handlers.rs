// storefront/src/web/handlers/health_handlers.rs

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::state::AppState;

pub async fn health_check_handler(app_state: web::Data<AppState>) -> HttpResponse {
  HttpResponse::Ok().json(json!({
    "status": "ok",
    "gateway": app_state.gateway.provider(),
  }))
}
