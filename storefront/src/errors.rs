// storefront/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use storeledger_flow::FlowError;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::services::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Amount mismatch: expected {expected}, claimed {claimed}")]
  AmountMismatch { expected: i64, claimed: i64 },

  #[error("Invalid EMI terms: installment of {installment} is below the minimum chargeable amount {minimum}")]
  InvalidEmiTerms { installment: i64, minimum: i64 },

  #[error("Webhook signature rejected: {0}")]
  Signature(String),

  #[error("Payment gateway error: {0}")]
  Gateway(#[from] GatewayError),

  #[error("Ledger error: {0}")]
  Persistence(#[from] LedgerError),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Workflow Error: {0}")]
  Workflow(#[from] FlowError),

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<sqlx::Error>() {
      Ok(db_err) => AppError::Persistence(LedgerError::Database(db_err)),
      Err(err) => AppError::Internal(err.to_string()),
    }
  }
}

impl From<sqlx::Error> for AppError {
  fn from(err: sqlx::Error) -> Self {
    AppError::Persistence(LedgerError::Database(err))
  }
}

impl AppError {
  /// Stable machine-readable error kind returned to clients.
  pub fn kind(&self) -> &'static str {
    match self {
      AppError::Validation(_) => "validation_error",
      AppError::AmountMismatch { .. } => "amount_mismatch",
      AppError::InvalidEmiTerms { .. } => "invalid_emi_terms",
      AppError::Signature(_) => "signature_error",
      AppError::Gateway(GatewayError::Declined { .. }) => "payment_declined",
      AppError::Gateway(_) => "gateway_error",
      AppError::Persistence(LedgerError::NotFound(_)) | AppError::NotFound(_) => "not_found",
      AppError::Persistence(LedgerError::Conflict(_)) => "conflict",
      AppError::Persistence(_) => "persistence_error",
      AppError::Auth(_) => "unauthorized",
      AppError::Config(_) => "configuration_error",
      AppError::Workflow(_) | AppError::Internal(_) => "internal_error",
    }
  }

  fn client_message(&self) -> String {
    match self {
      AppError::Gateway(GatewayError::Declined { message, .. }) => message.clone(),
      AppError::Gateway(_) => "The payment processor is temporarily unavailable. Please retry shortly.".to_string(),
      AppError::Persistence(LedgerError::Database(_)) => {
        "We could not record this request. Please retry shortly.".to_string()
      }
      AppError::Config(_) | AppError::Workflow(_) | AppError::Internal(_) => {
        "An internal error occurred. Please retry shortly.".to_string()
      }
      other => other.to_string(),
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Validation(_) | AppError::Signature(_) => StatusCode::BAD_REQUEST,
      AppError::AmountMismatch { .. } | AppError::InvalidEmiTerms { .. } => StatusCode::UNPROCESSABLE_ENTITY,
      AppError::Gateway(GatewayError::Declined { .. }) => StatusCode::PAYMENT_REQUIRED,
      AppError::Gateway(GatewayError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
      AppError::Gateway(GatewayError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
      AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
      AppError::Persistence(LedgerError::NotFound(_)) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Persistence(LedgerError::Conflict(_)) => StatusCode::CONFLICT,
      AppError::Auth(_) => StatusCode::UNAUTHORIZED,
      AppError::Persistence(_) | AppError::Config(_) | AppError::Workflow(_) | AppError::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, kind = self.kind(), "Responding with error");
    } else {
      tracing::warn!(application_error = %self, kind = self.kind(), "Responding with error");
    }
    HttpResponse::build(status).json(json!({
      "error": self.kind(),
      "message": self.client_message(),
    }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gateway_sub_kinds_map_to_distinct_statuses() {
    let declined = AppError::Gateway(GatewayError::Declined {
      code: "card_declined".into(),
      message: "Your card was declined.".into(),
      payment_id: None,
    });
    assert_eq!(declined.status_code(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(declined.kind(), "payment_declined");

    let timeout = AppError::Gateway(GatewayError::Timeout("charge".into()));
    assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(timeout.kind(), "gateway_error");

    let down = AppError::Gateway(GatewayError::Unavailable("503".into()));
    assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);
  }

  #[test]
  fn business_rule_rejections_are_client_errors() {
    assert_eq!(
      AppError::AmountMismatch { expected: 1000, claimed: 900 }.status_code(),
      StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
      AppError::InvalidEmiTerms { installment: 40, minimum: 5000 }.kind(),
      "invalid_emi_terms"
    );
    assert_eq!(AppError::Signature("bad".into()).status_code(), StatusCode::BAD_REQUEST);
  }

  #[test]
  fn internal_details_are_not_exposed() {
    let err = AppError::Internal("pool exhausted at 10.0.0.4".into());
    assert!(!err.client_message().contains("10.0.0.4"));
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
