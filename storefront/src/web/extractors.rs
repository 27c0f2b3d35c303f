// storefront/src/web/extractors.rs

//! Header-based caller identity. Issuing identities is another service's job;
//! these extractors only read what the gateway in front of us forwards.

use actix_web::{web, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const ADMIN_HEADER: &str = "X-Admin";
pub const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
  pub user_id: Uuid,
  pub is_admin: bool,
}

impl AuthenticatedUser {
  pub fn require_admin(&self) -> Result<(), AppError> {
    if self.is_admin {
      Ok(())
    } else {
      Err(AppError::Auth("Admin role required.".to_string()))
    }
  }
}

impl FromRequest for AuthenticatedUser {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
    let user_id = req
      .headers()
      .get(USER_ID_HEADER)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| Uuid::parse_str(v.trim()).ok());
    let Some(user_id) = user_id else {
      warn!("AuthenticatedUser extractor: missing or invalid X-User-ID header.");
      return ready(Err(AppError::Auth(
        "User authentication required. Missing or invalid X-User-ID header.".to_string(),
      )));
    };
    let is_admin = req
      .headers()
      .get(ADMIN_HEADER)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    ready(Ok(AuthenticatedUser { user_id, is_admin }))
  }
}

/// A scheduler or cron caller presenting the shared internal token.
#[derive(Debug, Clone, Copy)]
pub struct InternalCaller;

impl FromRequest for InternalCaller {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
    let Some(state) = req.app_data::<web::Data<AppState>>() else {
      return ready(Err(AppError::Internal("application state is not configured".to_string())));
    };
    let expected = state.config.internal_api_token.as_bytes();
    let presented = req
      .headers()
      .get(INTERNAL_TOKEN_HEADER)
      .map(|v| v.as_bytes())
      .unwrap_or_default();
    if expected.is_empty() || !bool::from(expected.ct_eq(presented)) {
      warn!("InternalCaller extractor: internal token rejected.");
      return ready(Err(AppError::Auth("Internal token required.".to_string())));
    }
    ready(Ok(InternalCaller))
  }
}
