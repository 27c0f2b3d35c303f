// core/tests/registry_tests.rs
mod common;

use common::*;
use serial_test::serial;
use storeledger_flow::{Flow, FlowContext, FlowOutcome, FlowRegistry};

#[derive(Debug, Default)]
struct OtherContext {
  hits: u32,
}

#[tokio::test]
#[serial]
async fn runs_flow_registered_for_context_type() {
  setup_tracing();
  let registry = FlowRegistry::<TestError>::new();
  let mut flow = Flow::<TestContext, TestError>::new(&[("only", false, None)]);
  flow.on("only", recording_handler("only"));
  registry.register(flow);

  let ctx = FlowContext::new(TestContext::default());
  let outcome = registry.run(ctx.clone()).await;

  assert_eq!(outcome, Ok(FlowOutcome::Completed));
  assert_eq!(ctx.read().steps_executed, vec!["only"]);
  assert!(registry.contains::<TestContext>());
  assert!(!registry.contains::<OtherContext>());
}

#[tokio::test]
#[serial]
async fn unregistered_context_type_is_an_error() {
  setup_tracing();
  let registry = FlowRegistry::<TestError>::new();
  let outcome = registry.run(FlowContext::new(OtherContext::default())).await;
  match outcome {
    Err(TestError::Flow(msg)) => assert!(msg.contains("OtherContext")),
    other => panic!("expected NotRegistered, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn flows_for_different_contexts_are_independent() {
  setup_tracing();
  let registry = FlowRegistry::<TestError>::new();

  let mut a = Flow::<TestContext, TestError>::new(&[("a", false, None)]);
  a.on("a", recording_handler("a"));
  registry.register(a);

  let mut b = Flow::<OtherContext, TestError>::new(&[("b", false, None)]);
  b.on("b", |ctx: FlowContext<OtherContext>| async move {
    ctx.write().hits += 1;
    Ok::<_, TestError>(storeledger_flow::StepControl::Continue)
  });
  registry.register(b);

  let other = FlowContext::new(OtherContext::default());
  registry.run(other.clone()).await.unwrap();
  registry.run(other.clone()).await.unwrap();
  assert_eq!(other.read().hits, 2);

  let test_ctx = FlowContext::new(TestContext::default());
  registry.run(test_ctx.clone()).await.unwrap();
  assert_eq!(test_ctx.read().counter, 1);
}
