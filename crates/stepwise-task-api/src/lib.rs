//! Task trait system for stepwise runs
//!
//! This crate is the contract between the orchestrator and task
//! implementations. The orchestrator knows how to run, sequence, observe and
//! recover tasks; it never knows what a task does. Concrete tasks depend on
//! this crate, never on the orchestrator.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use stepwise_events::EventStore;
use stepwise_utils::{CancellationSignal, TaskError};

pub mod context;
pub mod trace;

pub use context::Context;
pub use trace::{TraceSpan, Tracer};

/// A task's logical result, e.g. `{"analysis": "...", "stepId": 0}`.
pub type TaskOutput = Value;

/// Where a run goes after a task completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Continue with the named task
    Next(String),
    /// Stop the run successfully
    End,
}

impl Route {
    pub fn next(task: impl Into<String>) -> Self {
        Self::Next(task.into())
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(task) => write!(f, "{task}"),
            Self::End => write!(f, "<end>"),
        }
    }
}

/// What an error handler decided to do with a task failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Continue as if the task had routed here. `Route::End` finishes the run
    /// successfully with a `null` output.
    Route(Route),
    /// Fail the run with the original error
    Rethrow,
}

/// Everything a task may touch while it executes.
///
/// The context borrow ends when `execute` returns, so tasks cannot hold on to
/// run state.
pub struct TaskScope<'a> {
    pub context: &'a mut Context,
    pub events: &'a EventStore,
    pub signal: &'a CancellationSignal,
    pub tracer: &'a dyn Tracer,
    pub run_id: &'a str,
    /// Name of the executing task
    pub task: &'a str,
    /// Zero-based position of this execution within the run
    pub step_index: usize,
}

impl TaskScope<'_> {
    /// Return `TaskError::Cancelled` once the run's signal is set.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        self.signal.check()
    }

    /// Record a trace span. Tracer failures are logged and otherwise ignored.
    pub fn trace(&self, span: TraceSpan) {
        trace::record(self.tracer, span, self.run_id);
    }
}

impl fmt::Debug for TaskScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScope")
            .field("run_id", &self.run_id)
            .field("task", &self.task)
            .field("step_index", &self.step_index)
            .field("context_keys", &self.context.len())
            .field("cancelled", &self.signal.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Core trait that every task implements.
///
/// Tasks are registered once and shared read-only across concurrent runs, so
/// per-run state belongs in the [`Context`] or the [`EventStore`].
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique name within a task graph
    fn name(&self) -> &str;

    /// Task names `route` may return, checked when the graph is built.
    fn successors(&self) -> Vec<&str> {
        Vec::new()
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError>;

    /// Decide how to continue after `execute` failed. Not consulted for
    /// cancellation.
    async fn on_error(&self, _error: &TaskError, _scope: &mut TaskScope<'_>) -> Recovery {
        Recovery::Rethrow
    }

    fn route(&self, output: &TaskOutput) -> Route;
}
