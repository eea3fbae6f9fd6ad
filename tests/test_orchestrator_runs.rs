//! End-to-end behaviour of the orchestrator through the public facade.
//!
//! Covers routing, the task registry, step limits, error recovery, panic
//! containment and tracing. Cancellation lives in `test_cancellation.rs`.

mod test_support;

use std::sync::Arc;

use serde_json::json;

use stepwise::{
    CancellationSignal, Context, EventStore, ExecutionStatus, ExitCode, GraphError, MemoryTracer,
    Orchestrator, Route, RunError, RunOptions, StepwiseError, TaskError, TaskGraph,
};
use test_support::{BrokenTracer, Failing, Panicking, PanickingRoute, Relay, TRAIL, graph};

#[tokio::test]
async fn test_linear_run_follows_routes() {
    let orchestrator = Orchestrator::new(graph(vec![
        Relay::new("a").then("b").arc(),
        Relay::new("b").then("c").arc(),
        Relay::new("c").arc(),
    ]));

    let outcome = orchestrator.start_run("a", Context::new()).result().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.output(), Some(&json!({"task": "c", "visits": 1})));
    assert_eq!(outcome.events.get(TRAIL), Some(&json!(["a", "b", "c"])));
    assert_eq!(outcome.context.get("b"), &json!(1));

    let routes: Vec<_> = outcome
        .executions
        .iter()
        .map(|e| (e.task.as_str(), e.route.as_deref()))
        .collect();
    assert_eq!(
        routes,
        vec![("a", Some("b")), ("b", Some("c")), ("c", Some("<end>"))]
    );
    assert!(
        outcome
            .executions
            .iter()
            .all(|e| e.status == ExecutionStatus::Completed)
    );
}

#[tokio::test]
async fn test_trace_spans_recorded_per_execution() {
    let tracer = Arc::new(MemoryTracer::new());
    let orchestrator = Orchestrator::new(graph(vec![
        Relay::new("a").then("b").arc(),
        Relay::new("b").arc(),
    ]))
    .with_tracer(tracer.clone());

    let mut context = Context::new();
    context.set_value("question", json!("q"));
    let outcome = orchestrator.start_run("a", context).result().await;
    assert!(outcome.is_success());

    // Task-level spans are recorded from inside `execute`, before the
    // orchestrator's own span for the same task.
    assert_eq!(tracer.span_names(), vec!["a.inner", "a", "b.inner", "b"]);

    let spans = tracer.spans();
    let a = &spans[1];
    assert_eq!(a.input["question"], json!("q"));
    assert_eq!(a.output, json!({"task": "a", "visits": 1}));
    assert_eq!(a.metadata["step"], json!(0));
    assert_eq!(a.metadata["run_id"], json!(outcome.run_id.to_string()));
}

#[tokio::test]
async fn test_tracer_failures_do_not_change_outcome() {
    let orchestrator = Orchestrator::new(graph(vec![Relay::new("a").arc()]))
        .with_tracer(Arc::new(BrokenTracer));
    let outcome = orchestrator.start_run("a", Context::new()).result().await;
    assert!(outcome.is_success());
}

#[test]
fn test_registry_rejects_duplicates_and_unknown_successors() {
    let duplicate = TaskGraph::builder()
        .register(Relay::new("a").arc())
        .and_then(|b| b.register(Relay::new("a").arc()));
    assert!(matches!(
        duplicate,
        Err(GraphError::DuplicateTaskName { ref name }) if name == "a"
    ));

    struct Declares;
    #[async_trait::async_trait]
    impl stepwise::Task for Declares {
        fn name(&self) -> &str {
            "declares"
        }
        fn successors(&self) -> Vec<&str> {
            vec!["missing"]
        }
        async fn execute(
            &self,
            _scope: &mut stepwise::TaskScope<'_>,
        ) -> Result<stepwise::TaskOutput, TaskError> {
            Ok(json!(null))
        }
        fn route(&self, _output: &stepwise::TaskOutput) -> Route {
            Route::next("missing")
        }
    }

    let err = TaskGraph::builder()
        .register(Arc::new(Declares))
        .unwrap()
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownTask { ref name, .. } if name == "missing"));
    assert_eq!(StepwiseError::from(err).to_exit_code(), ExitCode::UNKNOWN_TASK);
}

#[tokio::test]
async fn test_unknown_entry_and_dynamic_route() {
    let orchestrator = Orchestrator::new(graph(vec![Relay::new("a").then("ghost").arc()]));

    let outcome = orchestrator.start_run("nope", Context::new()).result().await;
    assert!(matches!(
        outcome.result,
        Err(RunError::UnknownTask { ref name }) if name == "nope"
    ));
    assert!(outcome.executions.is_empty());

    // Undeclared successors are only discovered when routed to.
    let outcome = orchestrator.start_run("a", Context::new()).result().await;
    assert!(matches!(
        outcome.result,
        Err(RunError::UnknownTask { ref name }) if name == "ghost"
    ));
    assert_eq!(outcome.events.get(TRAIL), Some(&json!(["a"])));
}

#[tokio::test]
async fn test_self_loop_stops_at_context_step_limit() {
    let orchestrator = Orchestrator::new(graph(vec![Relay::new("loop").then("loop").arc()]));

    let mut context = Context::new();
    context.set_value(stepwise::orchestrator::MAX_STEPS_KEY, json!(5));
    let outcome = orchestrator.start_run("loop", context).result().await;

    assert!(matches!(
        outcome.result,
        Err(RunError::StepLimitExceeded { limit: 5, ref task }) if task == "loop"
    ));
    assert_eq!(outcome.executions.len(), 5);
    assert_eq!(outcome.context.get("loop"), &json!(5));
    assert_eq!(outcome.label(), "step_limit");
}

#[tokio::test]
async fn test_run_options_step_limit() {
    let orchestrator = Orchestrator::new(graph(vec![Relay::new("loop").then("loop").arc()]))
        .with_options(RunOptions::default().with_max_steps(2));
    let outcome = orchestrator.start_run("loop", Context::new()).result().await;

    let err = outcome.result.unwrap_err();
    assert_eq!(
        StepwiseError::Run(err).to_exit_code(),
        ExitCode::STEP_LIMIT
    );
}

#[tokio::test]
async fn test_rethrow_fails_run_and_keeps_partial_state() {
    let orchestrator = Orchestrator::new(graph(vec![
        Relay::new("start").then("bad").arc(),
        Failing::rethrowing("bad"),
    ]));
    let outcome = orchestrator.start_run("start", Context::new()).result().await;

    match &outcome.result {
        Err(RunError::TaskFailed { task, source }) => {
            assert_eq!(task, "bad");
            assert!(matches!(source, TaskError::Failed(_)));
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
    assert_eq!(
        outcome.events.get("progress"),
        Some(&json!("written before failure"))
    );
    assert_eq!(outcome.context.get("partial"), &json!(true));
    assert!(outcome.context.contains("handled"));

    let last = outcome.executions.last().unwrap();
    assert_eq!(last.status, ExecutionStatus::Failed);
    assert!(last.error.as_deref().unwrap().contains("disk on fire"));
}

#[tokio::test]
async fn test_recovery_reroutes_to_another_task() {
    let orchestrator = Orchestrator::new(graph(vec![
        Failing::recovering("bad", Route::next("fallback")),
        Relay::new("fallback").arc(),
    ]));
    let outcome = orchestrator.start_run("bad", Context::new()).result().await;

    assert_eq!(outcome.output(), Some(&json!({"task": "fallback", "visits": 1})));
    assert_eq!(outcome.executions[0].status, ExecutionStatus::Recovered);
    assert_eq!(outcome.executions[0].route.as_deref(), Some("fallback"));
}

#[tokio::test]
async fn test_recovery_to_end_succeeds_with_null() {
    let orchestrator = Orchestrator::new(graph(vec![Failing::recovering("bad", Route::End)]));
    let outcome = orchestrator.start_run("bad", Context::new()).result().await;
    assert_eq!(outcome.output(), Some(&json!(null)));
}

#[tokio::test]
async fn test_panic_is_contained() {
    let orchestrator = Orchestrator::new(graph(vec![Arc::new(Panicking)]));
    let outcome = orchestrator
        .start_run("panicking", Context::new())
        .result()
        .await;

    match outcome.result {
        Err(RunError::TaskFailed {
            source: TaskError::Panicked { message },
            ..
        }) => assert!(message.contains("task exploded")),
        other => panic!("expected a contained panic, got {other:?}"),
    }
    assert_eq!(outcome.events.get(TRAIL), Some(&json!(["panicking"])));
}

#[tokio::test]
async fn test_route_panic_keeps_partial_context() {
    let orchestrator = Orchestrator::new(graph(vec![Arc::new(PanickingRoute)]));
    let outcome = orchestrator
        .start_run("misroute", Context::new())
        .result()
        .await;

    match &outcome.result {
        Err(RunError::TaskFailed {
            task,
            source: TaskError::Panicked { message },
        }) => {
            assert_eq!(task, "misroute");
            assert!(message.contains("no route for this output"));
        }
        other => panic!("expected a contained route panic, got {other:?}"),
    }
    assert_eq!(outcome.context.get("written"), &json!(true));
    // The task already succeeded, so its error handler is not consulted.
    assert!(!outcome.context.contains("handled"));
    assert_eq!(
        outcome.executions.last().map(|e| e.status),
        Some(ExecutionStatus::Failed)
    );
}

#[tokio::test]
async fn test_route_panic_in_inline_run_returns_outcome() {
    let orchestrator = Orchestrator::new(graph(vec![Arc::new(PanickingRoute)]));
    let signal = CancellationSignal::new();
    let events = EventStore::new();

    let outcome = orchestrator
        .run("misroute", Context::new(), &signal, &events)
        .await;
    assert_eq!(outcome.label(), "failed");
    assert_eq!(outcome.context.get("written"), &json!(true));
}

#[tokio::test]
async fn test_inline_run_uses_callers_store() {
    let orchestrator = Orchestrator::new(graph(vec![Relay::new("a").arc()]));
    let signal = CancellationSignal::new();
    let events = EventStore::new();

    let outcome = orchestrator
        .run("a", Context::new(), &signal, &events)
        .await;
    assert!(outcome.is_success());
    assert_eq!(events.get_state(TRAIL), Some(json!(["a"])));
    assert_eq!(events.replay(TRAIL), events.get_state(TRAIL));
}
