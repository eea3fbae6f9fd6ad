//! stepwise - cooperative, streaming task pipelines for LLM-driven agents
//!
//! A run executes a sequence of named tasks. Each task reads and extends a
//! shared [`Context`], publishes incremental progress to an [`EventStore`],
//! and decides which task runs next. The orchestrator sequences the tasks,
//! observes one cancellation signal, and contains task failures.
//!
//! stepwise can be used in two ways:
//! - **CLI**: `stepwise run "<question>"` runs the research pipeline and
//!   prints streamed step progress
//! - **Library**: register your own [`Task`] implementations and drive runs
//!   through an [`Orchestrator`]
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! # Run without contacting a model
//! stepwise run "What changed in Rust 2024?" --summary "let chains" --dry-run
//!
//! # List registered tasks
//! stepwise tasks
//!
//! # Show effective configuration with sources
//! stepwise config
//! ```
//!
//! # Quick Start (Library)
//!
//! ```no_run
//! use std::sync::Arc;
//! use stepwise::{Config, Context, Orchestrator, ScriptedBackend};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::default();
//! let backend = Arc::new(ScriptedBackend::new("The answer."));
//! let graph = stepwise::research_graph(backend, &config)?;
//! let orchestrator =
//!     Orchestrator::new(graph).with_options(stepwise::run_options(&config));
//!
//! let mut context = Context::new();
//! context.set_value("question", serde_json::json!("Why is the sky blue?"));
//!
//! let handle = orchestrator.start_run("analysis", context);
//! let outcome = handle.result().await;
//! println!("{:?}", outcome.output());
//! # Ok(())
//! # }
//! ```
//!
//! # Crates
//!
//! - `stepwise-utils`: errors, exit codes, logging, cancellation, redaction
//! - `stepwise-config`: configuration discovery and validation
//! - `stepwise-events`: event store, step model, chunk buffer
//! - `stepwise-task-api`: the task contract and the context store
//! - `stepwise-orchestrator`: task graph, runner, run handle, tracers
//! - `stepwise-llm`: model backends
//! - `stepwise-tasks`: the `analysis` and `writer` research tasks

use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Public API
// ============================================================================

pub use stepwise_config::{
    ChunkingConfig, CliArgs, Config, ConfigSource, LlmConfig, Provider, RunConfig,
};
pub use stepwise_events::{
    ChunkBuffer, EventSnapshot, EventStore, EventUpdate, Step, StepEntry, StepStatus, StepsState,
};
pub use stepwise_llm::{
    Generation, GenerationRequest, LlmBackend, Message, OpenAiCompatibleBackend, Role,
    ScriptedBackend, StreamDelta,
};
pub use stepwise_orchestrator::{
    ExecutionStatus, LogTracer, MemoryTracer, NoopTracer, Orchestrator, RunHandle, RunOptions,
    RunOutcome, TaskExecution, TaskGraph, TaskGraphBuilder,
};
pub use stepwise_task_api::{
    Context, Recovery, Route, Task, TaskOutput, TaskScope, TraceSpan, Tracer,
};
pub use stepwise_utils::{
    CancellationSignal, ConfigError, ContextError, ErrorCategory, ExitCode, GraphError, LlmError,
    RunError, StepwiseError, TaskError, UserFriendlyError,
};

// ============================================================================
// Module re-exports (not covered by the facade above)
// ============================================================================

pub use stepwise_config as config;
pub use stepwise_events as events;
pub use stepwise_llm as llm;
pub use stepwise_orchestrator as orchestrator;
pub use stepwise_tasks as tasks;
pub use stepwise_utils::{logging, redaction};

pub mod cli;

/// Task graph holding the research pipeline (`analysis` → `writer`).
pub fn research_graph(
    backend: Arc<dyn LlmBackend>,
    config: &Config,
) -> Result<TaskGraph, GraphError> {
    TaskGraph::builder()
        .register_all(stepwise_tasks::research_tasks(backend, config))?
        .build()
}

/// Run options derived from the `[run]` section.
#[must_use]
pub fn run_options(config: &Config) -> RunOptions {
    let options = RunOptions::default()
        .with_max_steps(config.run.max_steps)
        .with_event_capacity(config.run.event_capacity);
    match config.run.timeout_secs {
        Some(secs) => options.with_timeout(Duration::from_secs(secs)),
        None => options,
    }
}
