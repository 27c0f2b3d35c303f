// storefront/src/pipelines/checkout_pipeline.rs

//! Records a client-reported payment as an order.
//!
//! The client's status claim is only validated. In gateway trust mode the
//! processor's record of the payment decides the status, and in webhook mode
//! everything is written as pending for the reconciler to settle.

use std::sync::Arc;
use storeledger_flow::{Flow, FlowContext, FlowRegistry, SkipCondition, StepControl};
use tracing::{debug, info, warn};

use crate::config::TrustMode;
use crate::errors::AppError;
use crate::ledger::{LedgerError, NewLineItem, NewOrder, NewPaymentRecord, RecordOutcome, SubscriptionLink};
use crate::models::{BillingPeriod, PaymentStatus};
use crate::pipelines::common_steps::{normalize_currency, required};
use crate::pipelines::contexts::{CartLine, CheckoutCtx};
use crate::services::gateway::{GatewayError, GatewayPaymentStatus};

/// Statuses a client may report for a payment it just completed.
fn parse_claimed_status(raw: &str) -> Result<PaymentStatus, AppError> {
  match raw.to_ascii_lowercase().as_str() {
    "succeeded" => Ok(PaymentStatus::Succeeded),
    "processing" | "pending" | "requires_action" | "requires_capture" | "requires_confirmation" => {
      Ok(PaymentStatus::Pending)
    }
    "failed" | "canceled" | "requires_payment_method" => Err(AppError::Validation(
      "Only completed or processing payments can be recorded.".to_string(),
    )),
    other => Err(AppError::Validation(format!("Unknown payment status '{}'.", other))),
  }
}

/// Sum of line totals, rejecting malformed lines and overflow.
pub fn cart_total(cart: &[CartLine]) -> Result<i64, AppError> {
  cart.iter().try_fold(0i64, |acc, line| {
    if line.product_id.trim().is_empty() {
      return Err(AppError::Validation("Every cart item needs an id.".to_string()));
    }
    if line.quantity < 1 {
      return Err(AppError::Validation(format!(
        "Quantity for item {} must be at least 1.",
        line.product_id
      )));
    }
    if line.unit_price < 0 {
      return Err(AppError::Validation(format!(
        "Price for item {} cannot be negative.",
        line.product_id
      )));
    }
    line
      .unit_price
      .checked_mul(i64::from(line.quantity))
      .and_then(|line_total| acc.checked_add(line_total))
      .ok_or_else(|| AppError::Validation("Cart total is too large.".to_string()))
  })
}

fn webhook_trust_mode() -> SkipCondition<CheckoutCtx> {
  Arc::new(|ctx: FlowContext<CheckoutCtx>| ctx.read().app_state.config.trust_mode == TrustMode::Webhook)
}

pub fn register_checkout_flow(registry: &FlowRegistry<AppError>) {
  let mut f = Flow::<CheckoutCtx, AppError>::new(&[
    ("validate_checkout_request", false, None),
    ("check_existing_payment", false, None),
    ("load_billing_context", false, None),
    ("confirm_with_gateway", false, Some(webhook_trust_mode())),
    ("record_ledger_entries", false, None),
  ]);

  f.on("validate_checkout_request", |ctx: FlowContext<CheckoutCtx>| {
    Box::pin(async move {
      let (input, default_currency) = {
        let guard = ctx.read();
        (guard.input.clone(), guard.app_state.config.default_currency.clone())
      };

      if input.payment_id.trim().is_empty() {
        return Err(AppError::Validation("paymentId is required.".to_string()));
      }
      if input.amount < 1 {
        return Err(AppError::Validation("amount must be a positive minor-unit integer.".to_string()));
      }
      parse_claimed_status(&input.status)?;
      if input.subscription_id.is_some() && input.emi_id.is_some() {
        return Err(AppError::Validation(
          "A payment can belong to a subscription or an EMI plan, not both.".to_string(),
        ));
      }
      if input.cart.is_empty() && input.subscription_id.is_none() && input.emi_id.is_none() {
        return Err(AppError::Validation("cartItems cannot be empty.".to_string()));
      }

      let currency = normalize_currency(input.currency.as_deref().unwrap_or(&default_currency))?;
      let total = cart_total(&input.cart)?;

      // EMI first installments are checked against the plan once it is loaded.
      if input.emi_id.is_none() && !input.cart.is_empty() && total != input.amount {
        return Err(AppError::AmountMismatch {
          expected: total,
          claimed: input.amount,
        });
      }

      let items = input
        .cart
        .iter()
        .map(|line| NewLineItem {
          product_id: line.product_id.clone(),
          quantity: line.quantity,
          unit_price: line.unit_price,
        })
        .collect();

      let mut guard = ctx.write();
      guard.items = items;
      guard.cart_total = total;
      guard.currency = currency;
      guard.order_total = if input.cart.is_empty() { input.amount } else { total };
      guard.payment_status = PaymentStatus::Pending;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("check_existing_payment", |ctx: FlowContext<CheckoutCtx>| {
    Box::pin(async move {
      let (ledger, payment_id) = {
        let guard = ctx.read();
        (guard.app_state.ledger.clone(), guard.input.payment_id.clone())
      };

      let Some(existing) = ledger.find_payment_by_external_id(&payment_id).await? else {
        return Ok::<_, AppError>(StepControl::Continue);
      };
      let order_id = match (existing.order_id, existing.emi_plan_id) {
        (Some(order_id), _) => order_id,
        (None, Some(_)) => {
          return Err(AppError::Validation(format!(
            "Payment {} belongs to an EMI installment.",
            payment_id
          )))
        }
        (None, None) => {
          return Err(AppError::Persistence(LedgerError::Conflict(format!(
            "payment {} is already recorded without an order",
            payment_id
          ))))
        }
      };

      info!(payment_id = %payment_id, order_id = %order_id, "Payment already recorded; returning existing order.");
      let mut guard = ctx.write();
      guard.order_id = Some(order_id);
      guard.duplicate = true;
      Ok(StepControl::Stop)
    })
  });

  f.on("load_billing_context", |ctx: FlowContext<CheckoutCtx>| {
    Box::pin(async move {
      let (ledger, user_id, input, cart_total, currency) = {
        let guard = ctx.read();
        (
          guard.app_state.ledger.clone(),
          guard.user_id,
          guard.input.clone(),
          guard.cart_total,
          guard.currency.clone(),
        )
      };

      if let Some(plan_id) = input.emi_id {
        let plan = ledger
          .get_emi_plan(plan_id)
          .await?
          .filter(|p| p.user_id == user_id)
          .ok_or_else(|| AppError::NotFound(format!("EMI plan {} not found", plan_id)))?;
        if plan.is_active() {
          return Err(AppError::Persistence(LedgerError::Conflict(format!(
            "EMI plan {} already has its first payment",
            plan_id
          ))));
        }
        if plan.currency != currency {
          return Err(AppError::Validation(format!(
            "EMI plan {} is billed in {}, not {}.",
            plan_id, plan.currency, currency
          )));
        }
        if input.amount != plan.installment_amount {
          return Err(AppError::AmountMismatch {
            expected: plan.installment_amount,
            claimed: input.amount,
          });
        }
        if !input.cart.is_empty() && cart_total != plan.total_amount {
          return Err(AppError::AmountMismatch {
            expected: plan.total_amount,
            claimed: cart_total,
          });
        }
        debug!(emi_plan_id = %plan.id, "First EMI installment.");
        let mut guard = ctx.write();
        guard.order_total = plan.total_amount;
        guard.emi_plan = Some(plan);
        return Ok::<_, AppError>(StepControl::Continue);
      }

      if let Some(external_id) = input.subscription_id.clone() {
        let existing = ledger.find_subscription_by_external_id(&external_id).await?;
        if existing.as_ref().is_some_and(|s| s.user_id != user_id) {
          return Err(AppError::NotFound(format!("Subscription {} not found", external_id)));
        }
        let period = match input.period.as_deref() {
          Some(raw) => raw.parse::<BillingPeriod>().map_err(AppError::Validation)?,
          None => existing.map(|s| s.period).unwrap_or(BillingPeriod::Monthly),
        };
        ctx.write().subscription = Some(SubscriptionLink { external_id, period });
      }
      Ok(StepControl::Continue)
    })
  });

  f.on("confirm_with_gateway", |ctx: FlowContext<CheckoutCtx>| {
    Box::pin(async move {
      let (gateway, payment_id, claimed_amount, currency) = {
        let guard = ctx.read();
        (
          guard.app_state.gateway.clone(),
          guard.input.payment_id.clone(),
          guard.input.amount,
          guard.currency.clone(),
        )
      };

      let remote = gateway.retrieve_payment(&payment_id).await?;
      if remote.amount != claimed_amount {
        warn!(payment_id = %payment_id, remote_amount = remote.amount, "Processor amount differs from claim.");
        return Err(AppError::AmountMismatch {
          expected: remote.amount,
          claimed: claimed_amount,
        });
      }
      if !remote.currency.eq_ignore_ascii_case(&currency) {
        return Err(AppError::Validation(format!(
          "Payment {} was made in {}, not {}.",
          payment_id, remote.currency, currency
        )));
      }

      let status = match remote.status {
        GatewayPaymentStatus::Succeeded => PaymentStatus::Succeeded,
        GatewayPaymentStatus::Processing => PaymentStatus::Pending,
        GatewayPaymentStatus::Failed | GatewayPaymentStatus::Canceled => {
          return Err(AppError::Gateway(GatewayError::Declined {
            code: "payment_not_completed".to_string(),
            message: "The payment was not completed.".to_string(),
            payment_id: Some(payment_id),
          }));
        }
      };
      ctx.write().payment_status = status;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("record_ledger_entries", |ctx: FlowContext<CheckoutCtx>| {
    Box::pin(async move {
      let (ledger, new_order, payment_id) = {
        let guard = ctx.read();
        let new_order = NewOrder {
          user_id: guard.user_id,
          total_amount: guard.order_total,
          currency: guard.currency.clone(),
          items: guard.items.clone(),
          payment: Some(NewPaymentRecord {
            external_id: guard.input.payment_id.clone(),
            amount: guard.input.amount,
            currency: guard.currency.clone(),
            status: guard.payment_status,
          }),
          subscription: guard.subscription.clone(),
          emi_plan_id: guard.emi_plan.as_ref().map(|p| p.id),
        };
        (guard.app_state.ledger.clone(), new_order, guard.input.payment_id.clone())
      };

      let outcome = ledger.record_order_atomic(new_order).await?;
      let order_id = outcome.order_id();
      match outcome {
        RecordOutcome::Created { .. } => info!(payment_id = %payment_id, order_id = %order_id, "Order recorded."),
        RecordOutcome::Duplicate { .. } => {
          info!(payment_id = %payment_id, order_id = %order_id, "Concurrent request recorded this payment first.")
        }
      }

      let mut guard = ctx.write();
      guard.order_id = Some(order_id);
      guard.duplicate = matches!(outcome, RecordOutcome::Duplicate { .. });
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  // The order id must exist once the ledger step ran.
  f.after("record_ledger_entries", |ctx: FlowContext<CheckoutCtx>| {
    Box::pin(async move {
      required(ctx.read().order_id, "order_id")?;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register(f);
  info!("Checkout flow registered.");
}

#[cfg(test)]
mod tests {
  use super::*;

  fn line(id: &str, quantity: i32, unit_price: i64) -> CartLine {
    CartLine {
      product_id: id.to_string(),
      quantity,
      unit_price,
    }
  }

  #[test]
  fn cart_total_sums_line_totals() {
    assert_eq!(cart_total(&[line("1", 2, 500), line("2", 1, 250)]).unwrap(), 1250);
    assert_eq!(cart_total(&[]).unwrap(), 0);
  }

  #[test]
  fn cart_total_rejects_bad_lines() {
    assert!(matches!(cart_total(&[line("1", 0, 500)]), Err(AppError::Validation(_))));
    assert!(matches!(cart_total(&[line("1", 1, -5)]), Err(AppError::Validation(_))));
    assert!(matches!(cart_total(&[line(" ", 1, 5)]), Err(AppError::Validation(_))));
    assert!(matches!(
      cart_total(&[line("1", i32::MAX, i64::MAX)]),
      Err(AppError::Validation(_))
    ));
  }

  #[test]
  fn client_may_only_report_live_payments() {
    assert_eq!(parse_claimed_status("succeeded").unwrap(), PaymentStatus::Succeeded);
    assert_eq!(parse_claimed_status("processing").unwrap(), PaymentStatus::Pending);
    assert!(parse_claimed_status("failed").is_err());
    assert!(parse_claimed_status("bogus").is_err());
  }
}
