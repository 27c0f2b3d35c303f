// storefront/src/services/customers.rs

//! Processor customer provisioning.

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result as AppResult};
use crate::services::gateway::CustomerProfile;
use crate::state::AppState;

/// Returns the user's processor customer, creating and linking one if needed.
///
/// Two concurrent callers may both create a remote customer; the ledger's
/// insert-if-absent keeps exactly one link and the loser's remote customer is
/// left unused.
#[instrument(name = "customers::resolve", skip(state, profile), fields(user_id = %profile.user_id))]
pub async fn resolve_customer(state: &AppState, profile: &CustomerProfile) -> AppResult<String> {
  if let Some(existing) = state.ledger.find_customer(profile.user_id).await? {
    return Ok(existing.customer_id);
  }

  let created = state.gateway.create_customer(profile).await?;
  let linked = state.ledger.link_customer(profile.user_id, &created).await?;
  if linked != created {
    warn!(
      created = %created,
      linked = %linked,
      "Lost customer provisioning race; using the already linked customer."
    );
  } else {
    info!(customer_id = %linked, "Processor customer linked.");
  }
  Ok(linked)
}

/// Saves `payment_method_id` on the user's customer as the default method.
#[instrument(name = "customers::attach_payment_method", skip(state))]
pub async fn attach_default_payment_method(state: &AppState, user_id: Uuid, payment_method_id: &str) -> AppResult<()> {
  if payment_method_id.trim().is_empty() {
    return Err(AppError::Validation("paymentMethodId is required.".to_string()));
  }
  let customer = state
    .ledger
    .find_customer(user_id)
    .await?
    .ok_or_else(|| AppError::NotFound("No billing customer exists for this user.".to_string()))?;
  state
    .gateway
    .attach_payment_method(&customer.customer_id, payment_method_id)
    .await?;
  info!(customer_id = %customer.customer_id, "Default payment method updated.");
  Ok(())
}
