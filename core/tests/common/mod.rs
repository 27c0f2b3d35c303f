// core/tests/common/mod.rs
#![allow(dead_code)]

use once_cell::sync::Lazy;
use storeledger_flow::{FlowContext, FlowError, Handler, StepControl};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Default)]
pub struct TestContext {
  pub counter: i32,
  pub steps_executed: Vec<String>,
  pub should_stop_at: Option<String>,
  pub skip_optional: bool,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  #[error("flow error: {0}")]
  Flow(String),

  #[error("handler failed: {0}")]
  Handler(String),
}

impl From<FlowError> for TestError {
  fn from(e: FlowError) -> Self {
    TestError::Flow(e.to_string())
  }
}

/// Records `label` in `steps_executed`, bumps the counter and stops when
/// `should_stop_at` names this label.
pub fn recording_handler(label: &'static str) -> Handler<TestContext, TestError> {
  Box::new(move |ctx: FlowContext<TestContext>| {
    Box::pin(async move {
      let mut guard = ctx.write();
      guard.counter += 1;
      guard.steps_executed.push(label.to_string());
      if guard.should_stop_at.as_deref() == Some(label) {
        return Ok(StepControl::Stop);
      }
      Ok(StepControl::Continue)
    })
  })
}

pub fn failing_handler(message: &'static str) -> Handler<TestContext, TestError> {
  Box::new(move |_ctx: FlowContext<TestContext>| {
    Box::pin(async move { Err(TestError::Handler(message.to_string())) })
  })
}

static TRACING: Lazy<()> = Lazy::new(|| {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storeledger_flow=debug"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING);
}
