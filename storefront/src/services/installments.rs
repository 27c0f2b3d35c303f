// storefront/src/services/installments.rs

//! Periodic EMI installment charging.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result as AppResult};
use crate::ledger::{InstallmentCharge, InstallmentFailure, InstallmentUpdate, NewPayment};
use crate::models::{EmiPlan, PaymentStatus};
use crate::services::gateway::{preferred_payment_method, GatewayError, GatewayPaymentStatus, OffSessionCharge};
use crate::state::AppState;

const NO_PAYMENT_METHOD: &str = "no saved payment method";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChargeOutcome {
  #[serde(rename_all = "camelCase")]
  Charged {
    payment_id: String,
    installments_remaining: i32,
    completed: bool,
  },
  /// Accepted by the processor but not yet settled; counted when its webhook arrives.
  #[serde(rename_all = "camelCase")]
  Processing { payment_id: String },
  /// The current period is already paid.
  #[serde(rename_all = "camelCase")]
  AlreadyCharged { last_charged_at: Option<DateTime<Utc>> },
  /// An earlier installment payment is still processing.
  #[serde(rename_all = "camelCase")]
  AwaitingSettlement { payment_id: String },
  Completed,
  /// Still waiting for the first installment.
  NotActive,
  Blocked { reason: String },
  Failed { reason: String, retryable: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
  pub scanned: usize,
  pub charged: usize,
  pub processing: usize,
  pub completed: usize,
  pub failed: usize,
  pub blocked: usize,
  pub skipped: usize,
}

/// One key per attempt at an installment. The processor replays the stored
/// response, declines included, for a reused key, so each retry after a
/// recorded failure gets a fresh one.
pub fn idempotency_key(plan: &EmiPlan) -> String {
  match plan.failed_attempts {
    0 => format!("emi-{}-{}", plan.id, plan.next_installment_number()),
    n => format!("emi-{}-{}-retry-{}", plan.id, plan.next_installment_number(), n),
  }
}

/// Charges the next installment of one plan if it is due.
#[instrument(name = "installments::charge", skip(state, now), fields(emi_plan_id = %plan_id))]
pub async fn charge_installment(state: &AppState, plan_id: Uuid, now: DateTime<Utc>) -> AppResult<ChargeOutcome> {
  let plan = state
    .ledger
    .get_emi_plan(plan_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("EMI plan {} not found", plan_id)))?;
  charge_plan(state, plan, now).await
}

async fn charge_plan(state: &AppState, plan: EmiPlan, now: DateTime<Utc>) -> AppResult<ChargeOutcome> {
  if !plan.is_active() {
    return Ok(ChargeOutcome::NotActive);
  }
  if plan.completed || plan.installments_remaining <= 0 {
    return Ok(ChargeOutcome::Completed);
  }
  if let Some(payment_id) = &plan.pending_payment_id {
    return Ok(ChargeOutcome::AwaitingSettlement {
      payment_id: payment_id.clone(),
    });
  }
  if !plan.is_due(now, state.config.installment_spacing) {
    return Ok(ChargeOutcome::AlreadyCharged {
      last_charged_at: plan.last_charged_at,
    });
  }

  let methods = state.gateway.list_payment_methods(&plan.customer_id).await?;
  let Some(method) = preferred_payment_method(&methods) else {
    warn!(customer_id = %plan.customer_id, "No saved payment method; blocking plan.");
    state
      .ledger
      .set_emi_plan_blocked(plan.id, Some(NO_PAYMENT_METHOD.to_string()))
      .await?;
    return Ok(ChargeOutcome::Blocked {
      reason: NO_PAYMENT_METHOD.to_string(),
    });
  };

  let installment_number = plan.next_installment_number();
  let key = idempotency_key(&plan);
  let mut metadata = BTreeMap::new();
  metadata.insert("emi_plan_id".to_string(), plan.id.to_string());
  metadata.insert("installment".to_string(), installment_number.to_string());

  let charge = OffSessionCharge {
    customer_id: plan.customer_id.clone(),
    payment_method_id: method.id.clone(),
    amount: plan.installment_amount,
    currency: plan.currency.clone(),
    idempotency_key: key.clone(),
    metadata,
  };

  let result = match state.gateway.charge_off_session(charge).await {
    Ok(payment) if matches!(payment.status, GatewayPaymentStatus::Failed | GatewayPaymentStatus::Canceled) => {
      Err(GatewayError::Declined {
        code: "payment_not_completed".to_string(),
        message: "The installment payment was not completed.".to_string(),
        payment_id: Some(payment.payment_id),
      })
    }
    other => other,
  };

  match result {
    Ok(payment) => {
      let status = match payment.status {
        GatewayPaymentStatus::Succeeded => PaymentStatus::Succeeded,
        _ => PaymentStatus::Pending,
      };
      let update = state
        .ledger
        .record_installment_charge(InstallmentCharge {
          plan_id: plan.id,
          expected_remaining: plan.installments_remaining,
          payment: NewPayment {
            external_id: payment.payment_id.clone(),
            amount: plan.installment_amount,
            currency: plan.currency.clone(),
            status,
            user_id: plan.user_id,
            order_id: None,
            emi_plan_id: Some(plan.id),
          },
          charged_at: now,
        })
        .await?;
      match update {
        InstallmentUpdate::Applied(_) if status == PaymentStatus::Pending => {
          info!(
            payment_id = %payment.payment_id,
            installment = installment_number,
            "Installment accepted; waiting for settlement."
          );
          Ok(ChargeOutcome::Processing {
            payment_id: payment.payment_id,
          })
        }
        InstallmentUpdate::Applied(updated) => {
          info!(
            payment_id = %payment.payment_id,
            installment = installment_number,
            remaining = updated.installments_remaining,
            "Installment charged."
          );
          Ok(ChargeOutcome::Charged {
            payment_id: payment.payment_id,
            installments_remaining: updated.installments_remaining,
            completed: updated.completed,
          })
        }
        InstallmentUpdate::Stale => {
          debug!(idempotency_key = %key, "Installment already recorded by a concurrent run.");
          Ok(ChargeOutcome::AlreadyCharged {
            last_charged_at: plan.last_charged_at,
          })
        }
      }
    }
    Err(err) if err.is_retryable() => {
      // Outcome unknown: write nothing, the idempotency key makes the next attempt safe.
      warn!(error = %err, idempotency_key = %key, "Installment charge outcome unknown; will retry next run.");
      Ok(ChargeOutcome::Failed {
        reason: err.to_string(),
        retryable: true,
      })
    }
    Err(err) => {
      let external_id = match &err {
        GatewayError::Declined {
          payment_id: Some(id), ..
        } => id.clone(),
        _ => format!("{}-failed-{}", key, now.timestamp()),
      };
      warn!(error = %err, payment_id = %external_id, "Installment charge failed.");
      state
        .ledger
        .record_installment_failure(InstallmentFailure {
          plan_id: plan.id,
          expected_remaining: plan.installments_remaining,
          payment: NewPayment {
            external_id,
            amount: plan.installment_amount,
            currency: plan.currency.clone(),
            status: PaymentStatus::Failed,
            user_id: plan.user_id,
            order_id: None,
            emi_plan_id: Some(plan.id),
          },
        })
        .await?;
      Ok(ChargeOutcome::Failed {
        reason: err.to_string(),
        retryable: false,
      })
    }
  }
}

/// One scheduler pass over every activated plan that still owes installments.
/// A failure on one plan is logged and counted; it never stops the pass.
#[instrument(name = "installments::run_cycle", skip(state))]
pub async fn run_installment_cycle(state: &AppState) -> AppResult<SchedulerReport> {
  let plans = state.ledger.list_chargeable_emi_plans().await?;
  let now = Utc::now();
  let mut report = SchedulerReport {
    scanned: plans.len(),
    ..Default::default()
  };

  for plan in plans {
    let plan_id = plan.id;
    match charge_plan(state, plan, now).await {
      Ok(ChargeOutcome::Charged { completed, .. }) => {
        report.charged += 1;
        if completed {
          report.completed += 1;
        }
      }
      Ok(ChargeOutcome::Processing { .. }) => report.processing += 1,
      Ok(ChargeOutcome::Blocked { .. }) => report.blocked += 1,
      Ok(ChargeOutcome::Failed { .. }) => report.failed += 1,
      Ok(_) => report.skipped += 1,
      Err(e) => {
        error!(emi_plan_id = %plan_id, error = %e, "Installment charge errored.");
        report.failed += 1;
      }
    }
  }

  info!(?report, "Installment cycle finished.");
  Ok(report)
}

/// Runs [`run_installment_cycle`] every `interval` on the tokio runtime.
pub fn spawn_installment_scheduler(state: AppState, interval: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      timer.tick().await;
      if let Err(e) = run_installment_cycle(&state).await {
        error!(error = %e, "Installment cycle failed.");
      }
    }
  })
}
