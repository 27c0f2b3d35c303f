// storefront/src/state.rs
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::ledger::LedgerStore;
use crate::services::gateway::PaymentGateway;
use std::sync::Arc;
use storeledger_flow::FlowRegistry;

#[derive(Clone)]
pub struct AppState {
  pub ledger: Arc<dyn LedgerStore>,
  pub gateway: Arc<dyn PaymentGateway>,
  pub flows: Arc<FlowRegistry<AppError>>,
  pub config: Arc<AppConfig>,
}

impl AppState {
  /// Builds the state and registers every flow.
  pub fn new(config: AppConfig, ledger: Arc<dyn LedgerStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
    let flows = Arc::new(FlowRegistry::<AppError>::new());
    crate::pipelines::register_all_flows(&flows);
    Self {
      ledger,
      gateway,
      flows,
      config: Arc::new(config),
    }
  }
}
