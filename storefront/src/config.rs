// storefront/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayProvider {
  Stripe,
  Mock,
}

/// How much the checkout recorder trusts the client's claim that a payment succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
  /// Retrieve the payment from the processor and use its status and amount.
  Gateway,
  /// Record everything as pending; only webhooks promote payments.
  Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Text,
  Json,
}

impl FromStr for GatewayProvider {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "stripe" => Ok(GatewayProvider::Stripe),
      "mock" => Ok(GatewayProvider::Mock),
      other => Err(AppError::Config(format!("Unknown GATEWAY_PROVIDER '{}'", other))),
    }
  }
}

impl FromStr for TrustMode {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "gateway" => Ok(TrustMode::Gateway),
      "webhook" => Ok(TrustMode::Webhook),
      other => Err(AppError::Config(format!("Unknown CHECKOUT_TRUST_MODE '{}'", other))),
    }
  }
}

impl FromStr for LogFormat {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "text" => Ok(LogFormat::Text),
      "json" => Ok(LogFormat::Json),
      other => Err(AppError::Config(format!("Unknown LOG_FORMAT '{}'", other))),
    }
  }
}

#[derive(Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: String,
  pub database_max_connections: u32,
  pub run_migrations: bool,

  pub gateway_provider: GatewayProvider,
  pub stripe_secret_key: String,
  pub stripe_webhook_secret: String,
  pub stripe_api_base: String,
  pub gateway_timeout: Duration,
  pub webhook_tolerance: Duration,

  pub default_currency: String,
  /// Smallest amount the processor will charge, in minor units.
  pub min_charge_amount: i64,
  pub trust_mode: TrustMode,

  pub scheduler_enabled: bool,
  pub scheduler_interval: Duration,
  /// Minimum time between two installment charges of one plan.
  pub installment_spacing: Duration,

  pub internal_api_token: String,
  pub log_format: LogFormat,
}

fn parse_var<T: FromStr>(name: &str, raw: String) -> Result<T>
where
  T::Err: fmt::Display,
{
  raw
    .parse::<T>()
    .map_err(|e| AppError::Config(format!("Invalid {} value '{}': {}", name, raw, e)))
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();

    let get_env = |var_name: &str| {
      env::var(var_name).map_err(|e| AppError::Config(format!("Missing environment variable '{}': {}", var_name, e)))
    };
    let or_default = |var_name: &str, default: &str| get_env(var_name).unwrap_or_else(|_| default.to_string());

    let server_host = or_default("SERVER_HOST", "127.0.0.1");
    let server_port = parse_var::<u16>("SERVER_PORT", or_default("SERVER_PORT", "8080"))?;
    let database_url = get_env("DATABASE_URL")?;
    let database_max_connections = parse_var::<u32>("DATABASE_MAX_CONNECTIONS", or_default("DATABASE_MAX_CONNECTIONS", "10"))?;
    let run_migrations = parse_var::<bool>("RUN_MIGRATIONS", or_default("RUN_MIGRATIONS", "true"))?;

    let gateway_provider = or_default("GATEWAY_PROVIDER", "stripe").parse::<GatewayProvider>()?;
    let stripe_secret_key = match gateway_provider {
      GatewayProvider::Stripe => get_env("STRIPE_SECRET_KEY")?,
      GatewayProvider::Mock => or_default("STRIPE_SECRET_KEY", ""),
    };
    let stripe_webhook_secret = get_env("STRIPE_WEBHOOK_SECRET")?;
    let stripe_api_base = or_default("STRIPE_API_BASE", "https://api.stripe.com")
      .trim_end_matches('/')
      .to_string();
    let gateway_timeout =
      Duration::from_millis(parse_var::<u64>("GATEWAY_TIMEOUT_MS", or_default("GATEWAY_TIMEOUT_MS", "10000"))?);
    let webhook_tolerance =
      Duration::from_secs(parse_var::<u64>("WEBHOOK_TOLERANCE_SECS", or_default("WEBHOOK_TOLERANCE_SECS", "300"))?);

    let default_currency = or_default("DEFAULT_CURRENCY", "inr").to_ascii_lowercase();
    let min_charge_amount = parse_var::<i64>("MIN_CHARGE_AMOUNT", or_default("MIN_CHARGE_AMOUNT", "5000"))?;
    if min_charge_amount < 1 {
      return Err(AppError::Config("MIN_CHARGE_AMOUNT must be at least 1".to_string()));
    }
    let trust_mode = or_default("CHECKOUT_TRUST_MODE", "gateway").parse::<TrustMode>()?;

    let scheduler_enabled = parse_var::<bool>("SCHEDULER_ENABLED", or_default("SCHEDULER_ENABLED", "true"))?;
    let scheduler_interval = Duration::from_secs(parse_var::<u64>(
      "SCHEDULER_INTERVAL_SECS",
      or_default("SCHEDULER_INTERVAL_SECS", "86400"),
    )?);
    if scheduler_interval.is_zero() {
      return Err(AppError::Config("SCHEDULER_INTERVAL_SECS must be positive".to_string()));
    }
    let installment_spacing = Duration::from_secs(parse_var::<u64>(
      "INSTALLMENT_SPACING_SECS",
      or_default("INSTALLMENT_SPACING_SECS", "2592000"),
    )?);

    let internal_api_token = get_env("INTERNAL_API_TOKEN")?;
    if internal_api_token.is_empty() {
      return Err(AppError::Config("INTERNAL_API_TOKEN must not be empty".to_string()));
    }
    let log_format = or_default("LOG_FORMAT", "text").parse::<LogFormat>()?;

    Ok(Self {
      server_host,
      server_port,
      database_url,
      database_max_connections,
      run_migrations,
      gateway_provider,
      stripe_secret_key,
      stripe_webhook_secret,
      stripe_api_base,
      gateway_timeout,
      webhook_tolerance,
      default_currency,
      min_charge_amount,
      trust_mode,
      scheduler_enabled,
      scheduler_interval,
      installment_spacing,
      internal_api_token,
      log_format,
    })
  }

  /// Baseline used by tests and local tooling; no environment access.
  pub fn for_tests() -> Self {
    Self {
      server_host: "127.0.0.1".to_string(),
      server_port: 0,
      database_url: String::new(),
      database_max_connections: 1,
      run_migrations: false,
      gateway_provider: GatewayProvider::Mock,
      stripe_secret_key: String::new(),
      stripe_webhook_secret: "whsec_test_secret".to_string(),
      stripe_api_base: "http://127.0.0.1:12111".to_string(),
      gateway_timeout: Duration::from_secs(2),
      webhook_tolerance: Duration::from_secs(300),
      default_currency: "inr".to_string(),
      min_charge_amount: 5000,
      trust_mode: TrustMode::Gateway,
      scheduler_enabled: false,
      scheduler_interval: Duration::from_secs(3600),
      installment_spacing: Duration::from_secs(30 * 24 * 3600),
      internal_api_token: "internal-test-token".to_string(),
      log_format: LogFormat::Text,
    }
  }
}

impl fmt::Debug for AppConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    const REDACTED: &str = "[REDACTED]";
    f.debug_struct("AppConfig")
      .field("server_host", &self.server_host)
      .field("server_port", &self.server_port)
      .field("database_url", &REDACTED)
      .field("database_max_connections", &self.database_max_connections)
      .field("run_migrations", &self.run_migrations)
      .field("gateway_provider", &self.gateway_provider)
      .field("stripe_secret_key", &REDACTED)
      .field("stripe_webhook_secret", &REDACTED)
      .field("stripe_api_base", &self.stripe_api_base)
      .field("gateway_timeout", &self.gateway_timeout)
      .field("webhook_tolerance", &self.webhook_tolerance)
      .field("default_currency", &self.default_currency)
      .field("min_charge_amount", &self.min_charge_amount)
      .field("trust_mode", &self.trust_mode)
      .field("scheduler_enabled", &self.scheduler_enabled)
      .field("scheduler_interval", &self.scheduler_interval)
      .field("installment_spacing", &self.installment_spacing)
      .field("internal_api_token", &REDACTED)
      .field("log_format", &self.log_format)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn debug_output_redacts_secrets() {
    let mut cfg = AppConfig::for_tests();
    cfg.stripe_secret_key = "sk_live_abc123".to_string();
    cfg.database_url = "postgres://user:hunter2@db/ledger".to_string();
    let rendered = format!("{:?}", cfg);
    assert!(!rendered.contains("sk_live_abc123"));
    assert!(!rendered.contains("hunter2"));
    assert!(!rendered.contains("internal-test-token"));
    assert!(rendered.contains("[REDACTED]"));
  }

  #[test]
  fn enum_settings_parse_case_insensitively() {
    assert_eq!("Webhook".parse::<TrustMode>().unwrap(), TrustMode::Webhook);
    assert_eq!("MOCK".parse::<GatewayProvider>().unwrap(), GatewayProvider::Mock);
    assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    assert!("paypal".parse::<GatewayProvider>().is_err());
  }
}
