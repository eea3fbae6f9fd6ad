//! The run loop.
//!
//! A run is strictly sequential: one task executes at a time, and the next
//! task is chosen only after the previous one has returned and routed. Partial
//! context and event state is never rolled back when a task fails.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::Instrument;
use uuid::Uuid;

use stepwise_events::{DEFAULT_EVENT_CAPACITY, EventSnapshot, EventStore};
use stepwise_task_api::{
    Context, Recovery, Route, Task, TaskOutput, TaskScope, TraceSpan, Tracer, trace,
};
use stepwise_utils::logging::{
    log_run_finished, log_task_complete, log_task_error, log_task_start, task_span,
};
use stepwise_utils::redaction::redact_user_string;
use stepwise_utils::{CancellationSignal, RunError, TaskError};

use crate::graph::TaskGraph;
use crate::handle::RunHandle;
use crate::tracer::LogTracer;

/// Context key that overrides [`RunOptions::max_steps`] for a single run.
pub const MAX_STEPS_KEY: &str = "max_steps";

/// Per-orchestrator run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum task executions per run; `None` means unbounded.
    pub max_steps: Option<usize>,
    /// Broadcast buffer size for each run's event store.
    pub event_capacity: usize,
    /// Deadline applied by [`Orchestrator::start_run`].
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_steps: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            timeout: None,
        }
    }
}

impl RunOptions {
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    /// Failed, then rerouted by the task's error handler
    Recovered,
    Failed,
    Cancelled,
}

/// Record of one task execution within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskExecution {
    pub task: String,
    pub step_index: usize,
    pub duration_ms: u64,
    pub status: ExecutionStatus,
    /// Where the run went next, if anywhere
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Redacted error message for failed, recovered and cancelled executions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskExecution {
    fn new(task: &str, step_index: usize, duration: Duration, status: ExecutionStatus) -> Self {
        Self {
            task: task.to_string(),
            step_index,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            status,
            route: None,
            error: None,
        }
    }

    fn with_route(mut self, route: &Route) -> Self {
        self.route = Some(route.to_string());
        self
    }

    fn with_error(mut self, error: &TaskError) -> Self {
        self.error = Some(redact_user_string(&error.to_string()));
        self
    }
}

/// Final state of a run.
///
/// The context and event snapshot are always present, including after
/// failures and cancellation.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub result: Result<TaskOutput, RunError>,
    pub context: Context,
    pub events: EventSnapshot,
    pub executions: Vec<TaskExecution>,
}

impl RunOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn output(&self) -> Option<&TaskOutput> {
        self.result.as_ref().ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&RunError> {
        self.result.as_ref().err()
    }

    /// Short label used in logs and CLI summaries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match &self.result {
            Ok(_) => "success",
            Err(RunError::Cancelled { .. }) => "cancelled",
            Err(RunError::StepLimitExceeded { .. }) => "step_limit",
            Err(RunError::UnknownTask { .. }) => "unknown_task",
            Err(RunError::TaskFailed { .. }) => "failed",
            Err(RunError::Aborted { .. }) => "aborted",
        }
    }
}

enum Advance {
    Next(String),
    Finish(Result<TaskOutput, RunError>),
}

/// Drives runs over a [`TaskGraph`].
///
/// Cloning is cheap; every clone shares the graph and the tracer.
#[derive(Clone)]
pub struct Orchestrator {
    graph: TaskGraph,
    tracer: Arc<dyn Tracer>,
    options: RunOptions,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.graph)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph,
            tracer: Arc::new(LogTracer),
            options: RunOptions::default(),
        }
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Spawn a run onto the current tokio runtime.
    ///
    /// The handle's [`take_subscription`](RunHandle::take_subscription)
    /// receiver is created before the run starts, so it sees every update.
    pub fn start_run(&self, entry: impl Into<String>, context: Context) -> RunHandle {
        let run_id = Uuid::new_v4();
        let entry = entry.into();
        let events = EventStore::with_capacity(self.options.event_capacity);
        let signal = CancellationSignal::new();
        let initial_rx = events.subscribe();
        let deadline = self.options.timeout.map(|timeout| signal.cancel_after(timeout));

        let orchestrator = self.clone();
        let run_events = events.clone();
        let run_signal = signal.clone();
        let join = tokio::spawn(async move {
            let outcome = orchestrator
                .run_with_id(run_id, &entry, context, &run_signal, &run_events)
                .await;
            if let Some(timer) = deadline {
                timer.abort();
            }
            outcome
        });

        RunHandle::new(run_id, events, signal, join, initial_rx)
    }

    /// Drive a run to completion on the calling task.
    pub async fn run(
        &self,
        entry: &str,
        context: Context,
        signal: &CancellationSignal,
        events: &EventStore,
    ) -> RunOutcome {
        self.run_with_id(Uuid::new_v4(), entry, context, signal, events)
            .await
    }

    fn step_limit(&self, context: &Context) -> Option<usize> {
        context
            .get(MAX_STEPS_KEY)
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .or(self.options.max_steps)
    }

    async fn run_with_id(
        &self,
        run_id: Uuid,
        entry: &str,
        mut context: Context,
        signal: &CancellationSignal,
        events: &EventStore,
    ) -> RunOutcome {
        let run_id_str = run_id.to_string();
        let started = Instant::now();
        let mut executions = Vec::new();
        let mut current = entry.to_string();
        let mut step_index = 0usize;

        tracing::debug!(run_id = %run_id_str, entry = %entry, "run started");

        let result = loop {
            // Tasks that never suspend would otherwise starve the caller's cancel.
            tokio::task::yield_now().await;

            if let Some(limit) = self.step_limit(&context)
                && step_index >= limit
            {
                break Err(RunError::StepLimitExceeded {
                    limit,
                    task: current,
                });
            }

            let Ok(task) = self.graph.get(&current) else {
                break Err(RunError::UnknownTask { name: current });
            };

            if signal.is_cancelled() {
                break Err(RunError::Cancelled { task: current });
            }

            let (execution, advance) = self
                .execute_step(
                    &run_id_str,
                    task.as_ref(),
                    step_index,
                    &mut context,
                    signal,
                    events,
                )
                .await;
            executions.push(execution);
            step_index += 1;

            match advance {
                Advance::Next(next) => current = next,
                Advance::Finish(result) => break result,
            }
        };

        let outcome = RunOutcome {
            run_id,
            result,
            context,
            events: events.snapshot(),
            executions,
        };
        log_run_finished(
            &run_id_str,
            step_index,
            outcome.label(),
            started.elapsed().as_millis(),
        );
        outcome
    }

    async fn execute_step(
        &self,
        run_id: &str,
        task: &dyn Task,
        step_index: usize,
        context: &mut Context,
        signal: &CancellationSignal,
        events: &EventStore,
    ) -> (TaskExecution, Advance) {
        let name = task.name().to_string();
        let input = context.to_json();
        let span = task_span(run_id, &name, step_index);
        log_task_start(run_id, &name, step_index);
        let started = Instant::now();

        let mut scope = TaskScope {
            context,
            events,
            signal,
            tracer: self.tracer.as_ref(),
            run_id,
            task: &name,
            step_index,
        };

        let result = match AssertUnwindSafe(task.execute(&mut scope))
            .catch_unwind()
            .instrument(span.clone())
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(TaskError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        };
        let duration = started.elapsed();

        let error = match result {
            Ok(output) => {
                log_task_complete(run_id, &name, duration.as_millis());
                trace::record(
                    self.tracer.as_ref(),
                    TraceSpan::new(name.as_str())
                        .with_input(input)
                        .with_output(output.clone())
                        .with_metadata(json!({
                            "run_id": run_id,
                            "step": step_index,
                            "duration_ms": u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                        })),
                    run_id,
                );

                let route = match std::panic::catch_unwind(AssertUnwindSafe(|| task.route(&output))) {
                    Ok(route) => route,
                    Err(payload) => {
                        let error = TaskError::Panicked {
                            message: panic_message(payload.as_ref()),
                        };
                        log_task_error(run_id, &name, &error.to_string(), duration.as_millis());
                        let execution =
                            TaskExecution::new(&name, step_index, duration, ExecutionStatus::Failed)
                                .with_error(&error);
                        return (
                            execution,
                            Advance::Finish(Err(RunError::TaskFailed {
                                task: name,
                                source: error,
                            })),
                        );
                    }
                };
                let execution = TaskExecution::new(&name, step_index, duration, ExecutionStatus::Completed)
                    .with_route(&route);
                let advance = match route {
                    Route::Next(next) => Advance::Next(next),
                    Route::End => Advance::Finish(Ok(output)),
                };
                return (execution, advance);
            }
            Err(error) => error,
        };

        log_task_error(run_id, &name, &error.to_string(), duration.as_millis());

        if error.is_cancellation() || signal.is_cancelled() {
            let execution = TaskExecution::new(&name, step_index, duration, ExecutionStatus::Cancelled)
                .with_error(&error);
            return (execution, Advance::Finish(Err(RunError::Cancelled { task: name })));
        }

        let recovery = match AssertUnwindSafe(task.on_error(&error, &mut scope))
            .catch_unwind()
            .instrument(span)
            .await
        {
            Ok(recovery) => recovery,
            Err(payload) => {
                tracing::warn!(
                    run_id = %run_id,
                    task = %name,
                    panic = %panic_message(payload.as_ref()),
                    "error handler panicked, rethrowing original error"
                );
                Recovery::Rethrow
            }
        };

        match recovery {
            Recovery::Route(route) => {
                tracing::info!(run_id = %run_id, task = %name, route = %route, "error handler rerouted run");
                let execution = TaskExecution::new(&name, step_index, duration, ExecutionStatus::Recovered)
                    .with_route(&route)
                    .with_error(&error);
                let advance = match route {
                    Route::Next(next) => Advance::Next(next),
                    Route::End => Advance::Finish(Ok(Value::Null)),
                };
                (execution, advance)
            }
            Recovery::Rethrow => {
                let execution = TaskExecution::new(&name, step_index, duration, ExecutionStatus::Failed)
                    .with_error(&error);
                (
                    execution,
                    Advance::Finish(Err(RunError::TaskFailed {
                        task: name,
                        source: error,
                    })),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
