//! Cancellation and deadlines.
//!
//! One signal per run: it is observed between tasks and by tasks while they
//! run, and a task error raised under cancellation ends the run as
//! `Cancelled` without consulting the error handler.

mod test_support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use stepwise::{
    Context, ExecutionStatus, ExitCode, Orchestrator, RunError, RunOptions, StepwiseError,
};
use test_support::{Relay, Sleeper, Spin, Ticker, WaitForCancel, graph};

async fn wait_until_waiting(handle: &stepwise::RunHandle) {
    let mut rx = handle.subscribe();
    if handle.events().get_state("waiting").is_some() {
        return;
    }
    while let Ok(update) = rx.recv().await {
        if update.key == "waiting" {
            return;
        }
    }
}

#[tokio::test]
async fn test_cancel_running_task() {
    let orchestrator = Orchestrator::new(graph(vec![
        Relay::new("first").then("wait").arc(),
        Arc::new(WaitForCancel),
    ]));
    let handle = orchestrator.start_run("first", Context::new());

    wait_until_waiting(&handle).await;
    handle.cancel();
    let outcome = handle.result().await;

    assert!(matches!(
        outcome.result,
        Err(RunError::Cancelled { ref task }) if task == "wait"
    ));
    // The error handler would have rerouted to End.
    assert!(!outcome.context.contains("handled"));
    assert_eq!(outcome.context.get("first"), &json!(1));
    assert_eq!(outcome.events.get("waiting"), Some(&json!(true)));
    assert_eq!(
        outcome.executions.last().map(|e| e.status),
        Some(ExecutionStatus::Cancelled)
    );
    assert_eq!(outcome.label(), "cancelled");

    let err = outcome.result.unwrap_err();
    assert_eq!(StepwiseError::Run(err).to_exit_code(), ExitCode::CANCELLED);
}

#[tokio::test(start_paused = true)]
async fn test_plain_error_under_cancellation_is_cancelled() {
    let orchestrator = Orchestrator::new(graph(vec![Arc::new(Sleeper {
        name: "sleepy",
        delay: Duration::from_millis(50),
    })]));
    let handle = orchestrator.start_run("sleepy", Context::new());
    let _timer = handle.cancel_after(Duration::from_millis(10));

    let outcome = handle.result().await;
    // Sleeper's handler reroutes to End, but is never consulted.
    assert!(matches!(
        outcome.result,
        Err(RunError::Cancelled { ref task }) if task == "sleepy"
    ));
    let execution = &outcome.executions[0];
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.error.as_deref().unwrap().contains("noticed cancellation late"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_deadline() {
    let orchestrator = Orchestrator::new(graph(vec![Arc::new(WaitForCancel)]));
    let handle = orchestrator.start_run("wait", Context::new());
    let _timer = handle.cancel_after(Duration::from_secs(30));

    let outcome = handle.result().await;
    assert!(matches!(outcome.result, Err(RunError::Cancelled { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_run_options_timeout() {
    let orchestrator = Orchestrator::new(graph(vec![Arc::new(WaitForCancel)]))
        .with_options(RunOptions::default().with_timeout(Duration::from_secs(5)));
    let outcome = orchestrator
        .start_run("wait", Context::new())
        .result()
        .await;
    assert!(matches!(outcome.result, Err(RunError::Cancelled { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_does_not_fire_after_success() {
    let orchestrator = Orchestrator::new(graph(vec![Relay::new("quick").arc()]))
        .with_options(RunOptions::default().with_timeout(Duration::from_secs(5)));
    let handle = orchestrator.start_run("quick", Context::new());
    let signal = handle.signal().clone();

    let outcome = handle.result().await;
    assert!(outcome.is_success());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!signal.is_cancelled());
}

#[tokio::test]
async fn test_self_loop_is_externally_cancellable() {
    let orchestrator = Orchestrator::new(graph(vec![Arc::new(Ticker)]));
    let handle = orchestrator.start_run("tick", Context::new());

    let mut rx = handle.subscribe();
    while let Ok(update) = rx.recv().await {
        if update.key == "ticks" && update.value.as_u64() >= Some(3) {
            break;
        }
    }
    handle.cancel();
    let outcome = handle.result().await;

    assert!(matches!(
        outcome.result,
        Err(RunError::Cancelled { ref task }) if task == "tick"
    ));
    // No execution starts once the signal is set.
    let ticks = outcome.events.get("ticks").and_then(|v| v.as_u64()).unwrap();
    assert_eq!(outcome.executions.len() as u64, ticks);
}

#[tokio::test]
async fn test_non_suspending_self_loop_is_cancellable() {
    let orchestrator = Orchestrator::new(graph(vec![Arc::new(Spin)]));
    let mut context = Context::new();
    context.set_value("max_steps", json!(200_000));
    let handle = orchestrator.start_run("spin", context);

    tokio::task::yield_now().await;
    handle.cancel();
    let outcome = handle.result().await;

    assert!(matches!(
        outcome.result,
        Err(RunError::Cancelled { ref task }) if task == "spin"
    ));
    assert!(outcome.executions.len() < 200_000);
    assert_eq!(
        outcome.context.get("spins").as_u64().unwrap_or(0),
        outcome.executions.len() as u64
    );
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let orchestrator = Orchestrator::new(graph(vec![
        Relay::new("a").then("b").arc(),
        Relay::new("b").arc(),
    ]));
    let signal = stepwise::CancellationSignal::new();
    signal.cancel();
    let events = stepwise::EventStore::new();

    let outcome = orchestrator
        .run("a", Context::new(), &signal, &events)
        .await;
    assert!(matches!(
        outcome.result,
        Err(RunError::Cancelled { ref task }) if task == "a"
    ));
    assert!(outcome.executions.is_empty());
    assert!(events.get_state(test_support::TRAIL).is_none());
}
