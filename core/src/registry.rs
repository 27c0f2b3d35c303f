// core/src/registry.rs

//! Type-keyed registry of flows. A flow is looked up by the type of the
//! context it runs on, so each context type has at most one flow.

use crate::core::context::FlowContext;
use crate::core::control::FlowOutcome;
use crate::error::FlowError;
use crate::flow::Flow;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{event, Level};

#[async_trait]
trait ErasedRunner<AppErr>: Send + Sync
where
  AppErr: std::error::Error + Send + Sync + 'static,
{
  async fn run_erased(&self, ctx: Box<dyn Any + Send>) -> Result<FlowOutcome, AppErr>;
}

struct Registered<T, HandlerErr, AppErr>
where
  T: 'static + Send + Sync,
  HandlerErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  flow: Arc<Flow<T, HandlerErr>>,
  _app_err: PhantomData<fn() -> AppErr>,
}

#[async_trait]
impl<T, HandlerErr, AppErr> ErasedRunner<AppErr> for Registered<T, HandlerErr, AppErr>
where
  T: 'static + Send + Sync,
  HandlerErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
  AppErr: std::error::Error + From<HandlerErr> + From<FlowError> + Send + Sync + 'static,
{
  async fn run_erased(&self, ctx: Box<dyn Any + Send>) -> Result<FlowOutcome, AppErr> {
    let ctx = match ctx.downcast::<FlowContext<T>>() {
      Ok(ctx) => *ctx,
      Err(_) => {
        return Err(AppErr::from(FlowError::TypeMismatch {
          expected_type: std::any::type_name::<FlowContext<T>>().to_string(),
        }))
      }
    };
    self.flow.run(ctx).await.map_err(AppErr::from)
  }
}

pub struct FlowRegistry<AppErr = FlowError>
where
  AppErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  flows: RwLock<HashMap<TypeId, Arc<dyn ErasedRunner<AppErr>>>>,
}

impl<AppErr> Default for FlowRegistry<AppErr>
where
  AppErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<AppErr> FlowRegistry<AppErr>
where
  AppErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      flows: RwLock::new(HashMap::new()),
    }
  }

  /// Registers `flow` for context type `T`, replacing any earlier registration.
  pub fn register<T, HandlerErr>(&self, flow: Flow<T, HandlerErr>)
  where
    T: 'static + Send + Sync,
    HandlerErr: std::error::Error + From<FlowError> + Send + Sync + 'static,
    AppErr: From<HandlerErr>,
  {
    event!(Level::DEBUG, context_type = %std::any::type_name::<T>(), steps = ?flow.step_names(), "Registering flow.");
    let runner = Registered::<T, HandlerErr, AppErr> {
      flow: Arc::new(flow),
      _app_err: PhantomData,
    };
    self.flows.write().insert(TypeId::of::<T>(), Arc::new(runner));
  }

  pub fn contains<T: 'static + Send + Sync>(&self) -> bool {
    self.flows.read().contains_key(&TypeId::of::<T>())
  }

  /// Runs the flow registered for `T`. The caller keeps its clone of `ctx`
  /// and reads the final state from it after the run.
  pub async fn run<T>(&self, ctx: FlowContext<T>) -> Result<FlowOutcome, AppErr>
  where
    T: 'static + Send + Sync,
  {
    let runner = {
      let flows = self.flows.read();
      flows.get(&TypeId::of::<T>()).cloned()
    };
    let runner = runner.ok_or_else(|| {
      let context_type = std::any::type_name::<T>();
      event!(Level::ERROR, context_type = %context_type, "No flow registered.");
      AppErr::from(FlowError::NotRegistered {
        context_type: context_type.to_string(),
      })
    })?;
    runner.run_erased(Box::new(ctx)).await
  }
}
