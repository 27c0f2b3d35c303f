// storefront/src/pipelines/mod.rs

//! Flow definitions for every write path of the service.

use crate::errors::AppError;
use storeledger_flow::FlowRegistry;

pub mod common_steps;
pub mod contexts;

pub mod checkout_pipeline;
pub mod emi_pipeline;
pub mod subscription_pipeline;
pub mod webhook_pipeline;

/// Registers all flows. Called once when the application state is built.
pub fn register_all_flows(registry: &FlowRegistry<AppError>) {
  tracing::info!("Registering flows...");
  checkout_pipeline::register_checkout_flow(registry);
  subscription_pipeline::register_subscription_flow(registry);
  emi_pipeline::register_emi_flow(registry);
  webhook_pipeline::register_webhook_flow(registry);
  tracing::info!("All flows registered.");
}
