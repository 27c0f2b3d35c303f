// storefront/src/pipelines/subscription_pipeline.rs

use storeledger_flow::{Flow, FlowContext, FlowRegistry, StepControl};
use tracing::info;

use crate::errors::AppError;
use crate::ledger::NewSubscription;
use crate::models::local_observation_time;
use crate::pipelines::common_steps::{from_unix, required};
use crate::pipelines::contexts::SubscriptionCtx;
use crate::services::customers::resolve_customer;
use crate::services::gateway::CustomerProfile;

pub fn register_subscription_flow(registry: &FlowRegistry<AppError>) {
  let mut f = Flow::<SubscriptionCtx, AppError>::new(&[
    ("resolve_customer", false, None),
    ("create_remote_subscription", false, None),
    ("persist_subscription", false, None),
  ]);

  f.before("resolve_customer", |ctx: FlowContext<SubscriptionCtx>| {
    Box::pin(async move {
      if ctx.read().price_ref.trim().is_empty() {
        return Err(AppError::Validation("priceRef is required.".to_string()));
      }
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("resolve_customer", |ctx: FlowContext<SubscriptionCtx>| {
    Box::pin(async move {
      let (app_state, user_id) = {
        let guard = ctx.read();
        (guard.app_state.clone(), guard.user_id)
      };
      let profile = CustomerProfile {
        user_id,
        email: None,
        name: None,
      };
      let customer_id = resolve_customer(&app_state, &profile).await?;
      ctx.write().customer_id = Some(customer_id);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("create_remote_subscription", |ctx: FlowContext<SubscriptionCtx>| {
    Box::pin(async move {
      let (gateway, customer_id, price_ref) = {
        let guard = ctx.read();
        (
          guard.app_state.gateway.clone(),
          guard.customer_id.clone(),
          guard.price_ref.clone(),
        )
      };
      let customer_id = required(customer_id, "customer_id")?;

      let created = gateway.create_subscription(&customer_id, &price_ref).await?;
      info!(subscription_id = %created.subscription_id, status = created.status.as_str(), "Subscription created at processor.");

      let mut guard = ctx.write();
      guard.subscription_id = Some(created.subscription_id);
      guard.client_secret = created.client_secret;
      guard.status = Some(created.status);
      guard.current_period_end = created.current_period_end;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("persist_subscription", |ctx: FlowContext<SubscriptionCtx>| {
    Box::pin(async move {
      let (ledger, user_id, period, subscription_id, status, current_period_end) = {
        let guard = ctx.read();
        (
          guard.app_state.ledger.clone(),
          guard.user_id,
          guard.period,
          guard.subscription_id.clone(),
          guard.status,
          guard.current_period_end,
        )
      };
      let external_id = required(subscription_id, "subscription_id")?;
      let status = required(status, "status")?;

      let new_sub = NewSubscription {
        external_id,
        user_id,
        period,
        status,
        order_id: None,
        current_period_end: current_period_end.and_then(from_unix),
        // Processor events always outrank what we learned from our own request.
        observed_at: local_observation_time(),
      };
      // A webhook for the new subscription may have stored it first; the stored row wins.
      let stored = ledger.insert_subscription(new_sub).await?;
      info!(subscription_id = %stored.external_id, status = stored.status.as_str(), "Subscription persisted.");
      ctx.write().status = Some(stored.status);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register(f);
  info!("Subscription flow registered.");
}
