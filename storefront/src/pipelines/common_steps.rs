// storefront/src/pipelines/common_steps.rs

//! Small helpers shared by several flows.

use chrono::{DateTime, Utc};

use crate::errors::AppError;

/// Unwraps a value an earlier step was supposed to set.
pub fn required<T>(value: Option<T>, what: &str) -> Result<T, AppError> {
  value.ok_or_else(|| AppError::Internal(format!("{} was not set by an earlier step", what)))
}

pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
  DateTime::<Utc>::from_timestamp(secs, 0)
}

/// Lowercases and checks a three-letter currency code.
pub fn normalize_currency(raw: &str) -> Result<String, AppError> {
  let code = raw.trim().to_ascii_lowercase();
  if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
    return Err(AppError::Validation(format!("'{}' is not a currency code.", raw)));
  }
  Ok(code)
}
