// core/src/lib.rs

//! A small asynchronous step-workflow engine.
//!
//! A [`Flow`] is an ordered list of named steps. Each step can carry
//! `before`, `on` and `after` handlers which receive a shared
//! [`FlowContext`] and decide whether the flow continues or stops.
//! Steps may be optional and may be skipped by a predicate evaluated
//! against the context right before the step runs.
//!
//! Flows are registered in a [`FlowRegistry`] keyed by their context type,
//! so callers only need to build the context and call `run`.

pub mod core;
pub mod error;
pub mod flow;
pub mod registry;

pub use crate::core::context::{FlowContext, Handler};
pub use crate::core::control::{FlowOutcome, StepControl};
pub use crate::core::step::{SkipCondition, StepDef};
pub use crate::error::{FlowError, FlowResult};
pub use crate::flow::Flow;
pub use crate::registry::FlowRegistry;
