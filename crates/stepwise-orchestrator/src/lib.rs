//! Run orchestration for stepwise.
//!
//! A [`TaskGraph`] holds the registered tasks. An [`Orchestrator`] drives one
//! run at a time per call: it resolves the entry task, executes it, routes its
//! output to the next task and repeats until a task routes to `End`, an error
//! is not recovered, the run is cancelled, or the step limit is hit.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use stepwise_orchestrator::{Orchestrator, TaskGraph};
//! # use stepwise_task_api::{Context, Task};
//! # async fn demo(analysis: Arc<dyn Task>, writer: Arc<dyn Task>) -> anyhow::Result<()> {
//! let graph = TaskGraph::builder()
//!     .register(analysis)?
//!     .register(writer)?
//!     .build()?;
//! let orchestrator = Orchestrator::new(graph);
//!
//! let handle = orchestrator.start_run("analysis", Context::new());
//! let mut updates = handle.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(update) = updates.recv().await {
//!         println!("{} = {}", update.key, update.value);
//!     }
//! });
//! let outcome = handle.result().await;
//! println!("{:?}", outcome.result);
//! # Ok(())
//! # }
//! ```

pub mod graph;
pub mod handle;
pub mod runner;
pub mod tracer;

pub use graph::{TaskGraph, TaskGraphBuilder};
pub use handle::RunHandle;
pub use runner::{
    ExecutionStatus, MAX_STEPS_KEY, Orchestrator, RunOptions, RunOutcome, TaskExecution,
};
pub use tracer::{LogTracer, MemoryTracer, NoopTracer};
