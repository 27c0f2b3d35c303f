// core/src/flow/execution.rs

use crate::core::context::{FlowContext, Handler};
use crate::core::control::{FlowOutcome, StepControl};
use crate::error::FlowError;
use crate::flow::Flow;
use tracing::{event, instrument, Instrument, Level};

#[derive(Clone, Copy)]
enum Phase {
  Before,
  On,
  After,
}

impl Phase {
  fn as_str(self) -> &'static str {
    match self {
      Phase::Before => "before",
      Phase::On => "on",
      Phase::After => "after",
    }
  }
}

impl<T, Err> Flow<T, Err>
where
  T: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Runs every step in order against `ctx`.
  ///
  /// A step whose `skip_if` predicate returns `true` is passed over. A step with no
  /// handlers is passed over when optional and fails the run with
  /// [`FlowError::HandlerMissing`] otherwise. The first handler error aborts the run
  /// and is returned unchanged.
  #[instrument(
    name = "Flow::run",
    skip_all,
    fields(context_type = %std::any::type_name::<T>(), num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx: FlowContext<T>) -> Result<FlowOutcome, Err> {
    event!(Level::DEBUG, "Flow execution starting.");

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();

      if let Some(skip_if) = &step_def.skip_if {
        if skip_if(ctx.clone()) {
          event!(Level::DEBUG, step = step_name, "Step skipped by condition.");
          continue;
        }
      }

      let has_handlers = [&self.before, &self.on, &self.after]
        .iter()
        .any(|phase| phase.get(step_name).is_some_and(|v| !v.is_empty()));

      if !has_handlers {
        if step_def.optional {
          event!(Level::DEBUG, step = step_name, "Optional step has no handlers, skipping.");
          continue;
        }
        event!(Level::ERROR, step = step_name, "Non-optional step has no handlers.");
        return Err(Err::from(FlowError::HandlerMissing {
          step_name: step_def.name.clone(),
        }));
      }

      let step_span = tracing::info_span!("flow_step", step = step_name, index = step_idx);
      let control = self.run_step(step_name, &ctx).instrument(step_span).await?;

      if control == StepControl::Stop {
        event!(Level::INFO, step = step_name, "Flow stopped by handler.");
        return Ok(FlowOutcome::Stopped);
      }
    }

    event!(Level::DEBUG, "Flow execution completed.");
    Ok(FlowOutcome::Completed)
  }

  async fn run_step(&self, step_name: &str, ctx: &FlowContext<T>) -> Result<StepControl, Err> {
    for (phase, map) in [(Phase::Before, &self.before), (Phase::On, &self.on), (Phase::After, &self.after)] {
      if let Some(handlers) = map.get(step_name) {
        if run_phase(phase, handlers, ctx).await? == StepControl::Stop {
          return Ok(StepControl::Stop);
        }
      }
    }
    Ok(StepControl::Continue)
  }
}

async fn run_phase<T, Err>(phase: Phase, handlers: &[Handler<T, Err>], ctx: &FlowContext<T>) -> Result<StepControl, Err>
where
  T: 'static + Send + Sync,
  Err: std::error::Error + Send + Sync + 'static,
{
  for handler in handlers {
    match handler(ctx.clone()).await {
      Ok(StepControl::Continue) => {}
      Ok(StepControl::Stop) => return Ok(StepControl::Stop),
      Err(e) => {
        event!(Level::ERROR, phase = phase.as_str(), error = %e, "Handler failed.");
        return Err(e);
      }
    }
  }
  Ok(StepControl::Continue)
}
