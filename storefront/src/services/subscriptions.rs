// storefront/src/services/subscriptions.rs

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::{AppError, Result as AppResult};
use crate::ledger::{SubscriptionObservation, SubscriptionUpdate};
use crate::models::{Subscription, SubscriptionStatus};
use crate::state::AppState;

/// Cancels one of the caller's subscriptions at the processor, then in the ledger.
#[instrument(name = "subscriptions::cancel", skip(state), fields(user_id = %user_id))]
pub async fn cancel_subscription(state: &AppState, user_id: Uuid, external_id: &str) -> AppResult<Subscription> {
  let existing = state
    .ledger
    .find_subscription_by_external_id(external_id)
    .await?
    .filter(|s| s.user_id == user_id)
    .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", external_id)))?;

  if existing.status.is_terminal() {
    return Ok(existing);
  }

  let remote_status = state.gateway.cancel_subscription(external_id).await?;
  if remote_status != SubscriptionStatus::Canceled {
    info!(remote_status = remote_status.as_str(), "Processor reports a pending cancellation.");
  }
  // Locally the subscription ends now, even if the processor keeps a grace period.
  let observation = SubscriptionObservation {
    external_id: external_id.to_string(),
    status: SubscriptionStatus::Canceled,
    current_period_end: existing.current_period_end,
    observed_at: Utc::now(),
  };

  match state.ledger.apply_subscription_observation(observation).await? {
    SubscriptionUpdate::Applied(s) | SubscriptionUpdate::Ignored(s) => {
      info!(subscription_id = %s.external_id, status = s.status.as_str(), "Subscription canceled.");
      Ok(s)
    }
    SubscriptionUpdate::NotFound => Err(AppError::NotFound(format!("Subscription {} not found", external_id))),
  }
}
