pub mod context;
pub mod control;
pub mod step;

pub use context::{FlowContext, Handler};
pub use control::{FlowOutcome, StepControl};
pub use step::StepDef;
