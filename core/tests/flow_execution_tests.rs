// core/tests/flow_execution_tests.rs
mod common;

use common::*;
use serial_test::serial;
use std::sync::Arc;
use storeledger_flow::{Flow, FlowContext, FlowError, FlowOutcome, SkipCondition, StepControl};

#[tokio::test]
#[serial]
async fn steps_run_in_declared_order() {
  setup_tracing();
  let mut flow = Flow::<TestContext, TestError>::new(&[("one", false, None), ("two", false, None), ("three", false, None)]);
  flow.on("one", recording_handler("one"));
  flow.on("two", recording_handler("two"));
  flow.on("three", recording_handler("three"));

  let ctx = FlowContext::new(TestContext::default());
  let outcome = flow.run(ctx.clone()).await;

  assert_eq!(outcome, Ok(FlowOutcome::Completed));
  let guard = ctx.read();
  assert_eq!(guard.counter, 3);
  assert_eq!(guard.steps_executed, vec!["one", "two", "three"]);
}

#[tokio::test]
#[serial]
async fn before_on_after_run_in_phase_order() {
  setup_tracing();
  let mut flow = Flow::<TestContext, TestError>::new(&[("charge", false, None)]);
  flow.after("charge", recording_handler("after"));
  flow.on("charge", recording_handler("on"));
  flow.before("charge", recording_handler("before"));

  let ctx = FlowContext::new(TestContext::default());
  flow.run(ctx.clone()).await.unwrap();

  assert_eq!(ctx.read().steps_executed, vec!["before", "on", "after"]);
}

#[tokio::test]
#[serial]
async fn stop_halts_remaining_steps() {
  setup_tracing();
  let mut flow = Flow::<TestContext, TestError>::new(&[("a", false, None), ("b", false, None), ("c", false, None)]);
  flow.on("a", recording_handler("a"));
  flow.on("b", recording_handler("b"));
  flow.after("b", recording_handler("b_after"));
  flow.on("c", recording_handler("c"));

  let ctx = FlowContext::new(TestContext {
    should_stop_at: Some("b".to_string()),
    ..Default::default()
  });
  let outcome = flow.run(ctx.clone()).await;

  assert_eq!(outcome, Ok(FlowOutcome::Stopped));
  assert_eq!(ctx.read().steps_executed, vec!["a", "b"]);
}

#[tokio::test]
#[serial]
async fn handler_error_aborts_run() {
  setup_tracing();
  let mut flow = Flow::<TestContext, TestError>::new(&[("a", false, None), ("b", false, None), ("c", false, None)]);
  flow.on("a", recording_handler("a"));
  flow.on("b", failing_handler("gateway down"));
  flow.on("c", recording_handler("c"));

  let ctx = FlowContext::new(TestContext::default());
  let outcome = flow.run(ctx.clone()).await;

  assert_eq!(outcome, Err(TestError::Handler("gateway down".to_string())));
  assert_eq!(ctx.read().steps_executed, vec!["a"]);
}

#[tokio::test]
#[serial]
async fn optional_step_without_handlers_is_passed_over() {
  setup_tracing();
  let mut flow = Flow::<TestContext, TestError>::new(&[("a", false, None), ("extra", true, None), ("b", false, None)]);
  flow.on("a", recording_handler("a"));
  flow.on("b", recording_handler("b"));

  let ctx = FlowContext::new(TestContext::default());
  assert_eq!(flow.run(ctx.clone()).await, Ok(FlowOutcome::Completed));
  assert_eq!(ctx.read().steps_executed, vec!["a", "b"]);
}

#[tokio::test]
#[serial]
async fn required_step_without_handlers_fails() {
  setup_tracing();
  let mut flow = Flow::<TestContext, TestError>::new(&[("a", false, None), ("missing", false, None)]);
  flow.on("a", recording_handler("a"));

  let ctx = FlowContext::new(TestContext::default());
  match flow.run(ctx.clone()).await {
    Err(TestError::Flow(msg)) => assert!(msg.contains("missing"), "unexpected message: {msg}"),
    other => panic!("expected HandlerMissing, got {:?}", other),
  }
  assert_eq!(ctx.read().counter, 1);
}

#[tokio::test]
#[serial]
async fn skip_condition_is_evaluated_against_current_state() {
  setup_tracing();
  let skip_when_flagged: SkipCondition<TestContext> = Arc::new(|ctx: FlowContext<TestContext>| ctx.read().skip_optional);
  let mut flow = Flow::<TestContext, TestError>::new(&[
    ("flag", false, None),
    ("confirm", false, Some(skip_when_flagged)),
    ("record", false, None),
  ]);
  flow.on("flag", |ctx: FlowContext<TestContext>| async move {
    ctx.write().skip_optional = true;
    Ok::<_, FlowError>(StepControl::Continue)
  });
  flow.on("confirm", recording_handler("confirm"));
  flow.on("record", recording_handler("record"));

  let ctx = FlowContext::new(TestContext::default());
  flow.run(ctx.clone()).await.unwrap();

  assert_eq!(ctx.read().steps_executed, vec!["record"]);
}

#[tokio::test]
#[serial]
async fn insert_after_step_places_step_and_rejects_unknown_anchor() {
  setup_tracing();
  let mut flow = Flow::<TestContext, TestError>::new(&[("a", false, None), ("c", false, None)]);
  flow.insert_after_step("a", "b", false, None).unwrap();
  assert_eq!(flow.step_names(), vec!["a", "b", "c"]);

  let err = flow.insert_after_step("nope", "d", false, None).unwrap_err();
  assert!(matches!(err, FlowError::StepNotFound { .. }));
  assert!(flow.insert_after_step("a", "c", false, None).is_err());
}

#[test]
#[should_panic(expected = "not defined")]
fn hooking_unknown_step_panics() {
  let mut flow = Flow::<TestContext, TestError>::new(&[("a", false, None)]);
  flow.on("b", recording_handler("b"));
}
