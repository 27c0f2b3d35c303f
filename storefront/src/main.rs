// storefront/src/main.rs

use actix_web::{web as actix_data, App, HttpServer};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use storeledger::config::{AppConfig, GatewayProvider, LogFormat};
use storeledger::errors::AppError;
use storeledger::ledger::{LedgerStore, PgLedger};
use storeledger::services::gateway::{MockGateway, PaymentGateway, StripeGateway};
use storeledger::services::installments::spawn_installment_scheduler;
use storeledger::state::AppState;
use storeledger::web::configure_app_routes;

fn init_tracing(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  match format {
    LogFormat::Json => builder.json().init(),
    LogFormat::Text => builder.init(),
  }
}

fn build_gateway(config: &AppConfig) -> Result<Arc<dyn PaymentGateway>, AppError> {
  match config.gateway_provider {
    GatewayProvider::Stripe => {
      let stripe = StripeGateway::new(
        &config.stripe_api_base,
        &config.stripe_secret_key,
        config.gateway_timeout,
      )?;
      Ok(Arc::new(stripe))
    }
    GatewayProvider::Mock => {
      tracing::warn!("Using the in-process mock payment gateway.");
      Ok(Arc::new(MockGateway::new()))
    }
  }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  let app_config = match AppConfig::from_env() {
    Ok(cfg) => cfg,
    Err(e) => {
      eprintln!("Failed to load application configuration: {}", e);
      std::process::exit(1);
    }
  };
  init_tracing(app_config.log_format);
  tracing::info!(config = ?app_config, "Starting storeledger server...");

  let ledger = match PgLedger::connect(&app_config.database_url, app_config.database_max_connections).await {
    Ok(ledger) => {
      tracing::info!("Successfully connected to the database.");
      ledger
    }
    Err(e) => {
      tracing::error!(error = %e, "Failed to connect to the database.");
      return Err(std::io::Error::other(e.to_string()));
    }
  };
  if app_config.run_migrations {
    if let Err(e) = ledger.run_migrations().await {
      tracing::error!(error = %e, "Failed to apply migrations.");
      return Err(std::io::Error::other(e.to_string()));
    }
    tracing::info!("Migrations applied.");
  }

  let gateway = match build_gateway(&app_config) {
    Ok(gateway) => gateway,
    Err(e) => {
      tracing::error!(error = %e, "Failed to build the payment gateway.");
      return Err(std::io::Error::other(e.to_string()));
    }
  };

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  let ledger: Arc<dyn LedgerStore> = Arc::new(ledger);
  let app_state = AppState::new(app_config, ledger, gateway);

  if app_state.config.scheduler_enabled {
    tracing::info!(interval = ?app_state.config.scheduler_interval, "Starting installment scheduler.");
    spawn_installment_scheduler(app_state.clone(), app_state.config.scheduler_interval);
  }

  tracing::info!("Binding server to {}...", server_address);
  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await
}
