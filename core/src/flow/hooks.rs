// core/src/flow/hooks.rs

use crate::core::context::{FlowContext, Handler};
use crate::core::control::StepControl;
use crate::error::FlowError;
use crate::flow::Flow;
use std::future::Future;

fn boxed<T, Err, F, E>(handler_fn: impl Fn(FlowContext<T>) -> F + Send + Sync + 'static) -> Handler<T, Err>
where
  T: 'static + Send + Sync,
  Err: 'static,
  F: Future<Output = Result<StepControl, E>> + Send + 'static,
  E: Into<Err> + Send + Sync + 'static,
{
  Box::new(move |ctx| {
    let fut = handler_fn(ctx);
    Box::pin(async move { fut.await.map_err(Into::into) })
  })
}

impl<T, Err> Flow<T, Err>
where
  T: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub fn before<F, E>(&mut self, step_name: &str, handler_fn: impl Fn(FlowContext<T>) -> F + Send + Sync + 'static)
  where
    F: Future<Output = Result<StepControl, E>> + Send + 'static,
    E: Into<Err> + Send + Sync + 'static,
  {
    self.ensure_step_exists(step_name);
    self
      .before
      .entry(step_name.to_string())
      .or_default()
      .push(boxed(handler_fn));
  }

  /// Registers the main handler for a step. Several `on` handlers run in registration order.
  pub fn on<F, E>(&mut self, step_name: &str, handler_fn: impl Fn(FlowContext<T>) -> F + Send + Sync + 'static)
  where
    F: Future<Output = Result<StepControl, E>> + Send + 'static,
    E: Into<Err> + Send + Sync + 'static,
  {
    self.ensure_step_exists(step_name);
    self.on.entry(step_name.to_string()).or_default().push(boxed(handler_fn));
  }

  pub fn after<F, E>(&mut self, step_name: &str, handler_fn: impl Fn(FlowContext<T>) -> F + Send + Sync + 'static)
  where
    F: Future<Output = Result<StepControl, E>> + Send + 'static,
    E: Into<Err> + Send + Sync + 'static,
  {
    self.ensure_step_exists(step_name);
    self
      .after
      .entry(step_name.to_string())
      .or_default()
      .push(boxed(handler_fn));
  }
}
