// storefront/src/pipelines/webhook_pipeline.rs

//! Processor webhook reconciliation.
//!
//! Every transition is "set status to X" guarded by the ledger's monotonic
//! rules, so a replay or an out-of-order delivery converges on the same state.
//! The processed-event table only short-circuits exact replays.

use chrono::Utc;
use storeledger_flow::{Flow, FlowContext, FlowRegistry, StepControl};
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::ledger::{NewSubscription, PaymentUpdate, SubscriptionObservation, SubscriptionUpdate};
use crate::models::{BillingPeriod, PaymentStatus, SubscriptionStatus, UnmatchedPaymentEvent};
use crate::pipelines::common_steps::{from_unix, required};
use crate::pipelines::contexts::{WebhookCtx, WebhookDisposition};
use crate::services::gateway::webhook::{
  verify_webhook_signature, PaymentEventData, SubscriptionEventData, WebhookEvent, WebhookEventKind,
};
use crate::state::AppState;

async fn apply_payment_event(
  state: &AppState,
  event: &WebhookEvent,
  data: &PaymentEventData,
  status: PaymentStatus,
) -> Result<WebhookDisposition, AppError> {
  match state.ledger.apply_payment_status(&data.payment_id, status).await? {
    PaymentUpdate::Applied(payment) => {
      info!(payment_id = %payment.external_id, status = status.as_str(), "Payment settled by webhook.");
      Ok(WebhookDisposition::Applied)
    }
    PaymentUpdate::Unchanged(payment) => {
      debug!(
        payment_id = %payment.external_id,
        stored = payment.status.as_str(),
        "Payment already settled; event ignored."
      );
      Ok(WebhookDisposition::Ignored)
    }
    PaymentUpdate::NotFound => {
      // Checkout has not recorded this payment yet; it consumes this row when it does.
      warn!(payment_id = %data.payment_id, "Webhook for unrecorded payment; storing for later.");
      state
        .ledger
        .record_unmatched_payment(UnmatchedPaymentEvent {
          external_id: data.payment_id.clone(),
          status,
          amount: data.amount,
          currency: data.currency.clone(),
          event_id: event.id.clone(),
          received_at: Utc::now(),
        })
        .await?;
      Ok(WebhookDisposition::Deferred)
    }
  }
}

async fn apply_subscription_event(
  state: &AppState,
  event: &WebhookEvent,
  data: &SubscriptionEventData,
  status: SubscriptionStatus,
) -> Result<WebhookDisposition, AppError> {
  let observation = SubscriptionObservation {
    external_id: data.subscription_id.clone(),
    status,
    current_period_end: data.current_period_end.and_then(from_unix),
    observed_at: from_unix(event.created).unwrap_or_else(Utc::now),
  };

  match state.ledger.apply_subscription_observation(observation.clone()).await? {
    SubscriptionUpdate::Applied(sub) => {
      info!(subscription_id = %sub.external_id, status = sub.status.as_str(), "Subscription updated by webhook.");
      return Ok(WebhookDisposition::Applied);
    }
    SubscriptionUpdate::Ignored(sub) => {
      debug!(
        subscription_id = %sub.external_id,
        stored = sub.status.as_str(),
        "Stale or post-cancel subscription event ignored."
      );
      return Ok(WebhookDisposition::Ignored);
    }
    SubscriptionUpdate::NotFound => {}
  }

  // Unknown subscription: adopt it if the customer belongs to one of our users.
  let owner = match &data.customer_id {
    Some(customer_id) => state.ledger.find_customer_by_customer_id(customer_id).await?,
    None => None,
  };
  let Some(owner) = owner else {
    warn!(subscription_id = %data.subscription_id, "Subscription event for unknown customer; acknowledged without change.");
    return Ok(WebhookDisposition::Ignored);
  };

  let period = data
    .interval
    .as_deref()
    .and_then(|i| i.parse::<BillingPeriod>().ok())
    .unwrap_or(BillingPeriod::Monthly);
  let stored = state
    .ledger
    .insert_subscription(NewSubscription {
      external_id: data.subscription_id.clone(),
      user_id: owner.user_id,
      period,
      status,
      order_id: None,
      current_period_end: observation.current_period_end,
      observed_at: observation.observed_at,
    })
    .await?;
  // A concurrent writer may have inserted first; re-apply so the newest observation still wins.
  if stored.status != status {
    state.ledger.apply_subscription_observation(observation).await?;
  }
  info!(subscription_id = %data.subscription_id, user_id = %owner.user_id, "Subscription adopted from webhook.");
  Ok(WebhookDisposition::Applied)
}

pub fn register_webhook_flow(registry: &FlowRegistry<AppError>) {
  let mut f = Flow::<WebhookCtx, AppError>::new(&[
    ("verify_signature", false, None),
    ("skip_processed_event", false, None),
    ("apply_event_transition", false, None),
    ("mark_event_processed", false, None),
  ]);

  f.on("verify_signature", |ctx: FlowContext<WebhookCtx>| {
    Box::pin(async move {
      let event = {
        let guard = ctx.read();
        let config = &guard.app_state.config;
        let header = guard.signature_header.as_deref().unwrap_or_default();
        verify_webhook_signature(
          &guard.raw_body,
          header,
          &config.stripe_webhook_secret,
          config.webhook_tolerance,
          Utc::now().timestamp(),
        )
      };
      let event = event.map_err(|e| {
        warn!(error = %e, "Webhook signature rejected.");
        AppError::Signature(e.to_string())
      })?;
      debug!(event_id = %event.id, event_type = %event.event_type, "Webhook verified.");
      ctx.write().event = Some(event);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("skip_processed_event", |ctx: FlowContext<WebhookCtx>| {
    Box::pin(async move {
      let (ledger, event_id) = {
        let guard = ctx.read();
        (guard.app_state.ledger.clone(), guard.event.as_ref().map(|e| e.id.clone()))
      };
      let event_id = required(event_id, "event")?;
      if ledger.is_event_processed(&event_id).await? {
        info!(event_id = %event_id, "Webhook event already processed.");
        ctx.write().disposition = WebhookDisposition::Replayed;
        return Ok(StepControl::Stop);
      }
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("apply_event_transition", |ctx: FlowContext<WebhookCtx>| {
    Box::pin(async move {
      let (app_state, event) = {
        let guard = ctx.read();
        (guard.app_state.clone(), guard.event.clone())
      };
      let event = required(event, "event")?;

      let disposition = match &event.kind {
        WebhookEventKind::PaymentSucceeded(data) => {
          apply_payment_event(&app_state, &event, data, PaymentStatus::Succeeded).await?
        }
        WebhookEventKind::PaymentFailed(data) => {
          apply_payment_event(&app_state, &event, data, PaymentStatus::Failed).await?
        }
        WebhookEventKind::SubscriptionChanged(data) => match SubscriptionStatus::from_processor(&data.status) {
          Some(status) => apply_subscription_event(&app_state, &event, data, status).await?,
          None => {
            info!(subscription_id = %data.subscription_id, status = %data.status, "Unmapped subscription status ignored.");
            WebhookDisposition::Ignored
          }
        },
        WebhookEventKind::SubscriptionDeleted(data) => {
          apply_subscription_event(&app_state, &event, data, SubscriptionStatus::Canceled).await?
        }
        WebhookEventKind::Unhandled => {
          info!(event_type = %event.event_type, "Unhandled webhook event type acknowledged.");
          WebhookDisposition::Ignored
        }
      };
      ctx.write().disposition = disposition;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("mark_event_processed", |ctx: FlowContext<WebhookCtx>| {
    Box::pin(async move {
      let (ledger, event) = {
        let guard = ctx.read();
        (guard.app_state.ledger.clone(), guard.event.clone())
      };
      let event = required(event, "event")?;
      if !ledger.mark_event_processed(&event.id, &event.event_type).await? {
        debug!(event_id = %event.id, "Concurrent delivery marked this event first.");
      }
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register(f);
  info!("Webhook flow registered.");
}
