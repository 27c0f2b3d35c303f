// storefront/src/pipelines/emi_pipeline.rs

//! EMI plan creation: terms check, customer, first-installment intent plus a
//! setup intent for later off-session charges, then the plan row.
//!
//! The plan is stored unactivated. Checkout activates it when the first
//! installment's payment is recorded.

use std::collections::BTreeMap;
use storeledger_flow::{Flow, FlowContext, FlowRegistry, StepControl};
use tracing::info;

use crate::errors::AppError;
use crate::ledger::NewEmiPlan;
use crate::models::emi_plan::installment_amount;
use crate::pipelines::common_steps::required;
use crate::pipelines::contexts::EmiCtx;
use crate::services::customers::resolve_customer;
use crate::services::gateway::{ChargeIntentRequest, CustomerProfile};

pub fn register_emi_flow(registry: &FlowRegistry<AppError>) {
  let mut f = Flow::<EmiCtx, AppError>::new(&[
    ("validate_terms", false, None),
    ("resolve_customer", false, None),
    ("create_intents", false, None),
    ("persist_plan", false, None),
  ]);

  f.on("validate_terms", |ctx: FlowContext<EmiCtx>| {
    Box::pin(async move {
      let (total, months, minimum) = {
        let guard = ctx.read();
        (guard.total_amount, guard.months, guard.app_state.config.min_charge_amount)
      };
      if total < 1 {
        return Err(AppError::Validation("totalAmount must be at least 1.".to_string()));
      }
      if months < 1 {
        return Err(AppError::Validation("months must be at least 1.".to_string()));
      }
      let installment = installment_amount(total, months)
        .ok_or_else(|| AppError::Validation("Invalid EMI terms.".to_string()))?;
      if installment < minimum {
        return Err(AppError::InvalidEmiTerms { installment, minimum });
      }
      ctx.write().installment_amount = installment;
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("resolve_customer", |ctx: FlowContext<EmiCtx>| {
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

  f.on("create_intents", |ctx: FlowContext<EmiCtx>| {
    Box::pin(async move {
      let (gateway, plan_id, customer_id, amount, currency, months) = {
        let guard = ctx.read();
        (
          guard.app_state.gateway.clone(),
          guard.plan_id,
          guard.customer_id.clone(),
          guard.installment_amount,
          guard.currency.clone(),
          guard.months,
        )
      };
      let customer_id = required(customer_id, "customer_id")?;

      let mut metadata = BTreeMap::new();
      metadata.insert("emi_plan_id".to_string(), plan_id.to_string());
      metadata.insert("kind".to_string(), "first_installment".to_string());
      metadata.insert("installments".to_string(), months.to_string());

      let charge_intent = gateway
        .create_charge_intent(ChargeIntentRequest {
          amount,
          currency,
          customer_id: Some(customer_id.clone()),
          save_payment_method: true,
          metadata,
        })
        .await?;
      let setup_intent = gateway.create_setup_intent(&customer_id).await?;
      info!(
        emi_plan_id = %plan_id,
        intent_id = %charge_intent.intent_id,
        setup_intent_id = %setup_intent.setup_intent_id,
        "EMI intents created."
      );

      let mut guard = ctx.write();
      guard.charge_intent = Some(charge_intent);
      guard.setup_intent = Some(setup_intent);
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  f.on("persist_plan", |ctx: FlowContext<EmiCtx>| {
    Box::pin(async move {
      let (ledger, new_plan) = {
        let guard = ctx.read();
        let first_intent_id = guard.charge_intent.as_ref().map(|i| i.intent_id.clone());
        let new_plan = NewEmiPlan {
          id: guard.plan_id,
          user_id: guard.user_id,
          customer_id: required(guard.customer_id.clone(), "customer_id")?,
          currency: guard.currency.clone(),
          total_amount: guard.total_amount,
          installment_amount: guard.installment_amount,
          installment_count: guard.months,
          first_intent_id: required(first_intent_id, "charge_intent")?,
        };
        (guard.app_state.ledger.clone(), new_plan)
      };
      let plan = ledger.insert_emi_plan(new_plan).await?;
      info!(
        emi_plan_id = %plan.id,
        installments = plan.installment_count,
        installment_amount = plan.installment_amount,
        "EMI plan stored, awaiting first payment."
      );
      Ok::<_, AppError>(StepControl::Continue)
    })
  });

  registry.register(f);
  info!("EMI flow registered.");
}
