//! Research pipeline tasks
//!
//! `analysis` reviews the gathered findings and streams its reasoning into a
//! step; `writer` turns the analysis into the final answer. Both share one
//! error handler that marks the failing step as `ERROR`.
//!
//! Context keys read and written by these tasks live in [`keys`].

use std::sync::Arc;

use stepwise_config::{ChunkingConfig, Config};
use stepwise_events::{ChunkBuffer, StepStatus, upsert_step_entry};
use stepwise_llm::{Generation, GenerationRequest, LlmBackend, StreamDelta};
use stepwise_task_api::{Task, TaskScope};
use stepwise_utils::TaskError;

pub mod analysis;
pub mod error_handler;
pub mod prompt;
pub mod writer;

pub use analysis::AnalysisTask;
pub use writer::WriterTask;

pub const ANALYSIS: &str = "analysis";
pub const WRITER: &str = "writer";

pub mod keys {
    pub const QUESTION: &str = "question";
    /// Prior conversation as `[{role, content}]`
    pub const MESSAGES: &str = "messages";
    pub const SUMMARIES: &str = "summaries";
    pub const SOURCES: &str = "sources";
    pub const ANALYSIS: &str = "analysis";
    pub const ANSWER: &str = "answer";
    pub const ERROR: &str = "error";
    /// Step id of the task currently executing
    pub const CURRENT_STEP_ID: &str = "current_step_id";
}

/// Model and chunking settings for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub chunking: ChunkingConfig,
}

impl TaskSettings {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            temperature: None,
            chunking: ChunkingConfig::default(),
        }
    }

    /// Settings for `task`, honouring `[llm.models]` overrides.
    #[must_use]
    pub fn from_config(config: &Config, task: &str) -> Self {
        Self {
            model: config.llm.model_for_task(task).to_string(),
            max_tokens: Some(config.llm.max_tokens),
            temperature: Some(config.llm.temperature),
            chunking: config.chunking.clone(),
        }
    }

    fn request(&self, request: GenerationRequest) -> GenerationRequest {
        let request = match self.max_tokens {
            Some(n) => request.with_max_tokens(n),
            None => request,
        };
        match self.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        }
    }
}

/// Both research tasks, sharing `backend`.
#[must_use]
pub fn research_tasks(backend: Arc<dyn LlmBackend>, config: &Config) -> Vec<Arc<dyn Task>> {
    vec![
        Arc::new(AnalysisTask::new(
            Arc::clone(&backend),
            TaskSettings::from_config(config, ANALYSIS),
        )),
        Arc::new(WriterTask::new(
            backend,
            TaskSettings::from_config(config, WRITER),
        )),
    ]
}

/// Which part of a streamed generation feeds the step entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Reasoning,
    Text,
}

/// Result of [`stream_into_step`].
#[derive(Debug)]
pub(crate) struct Streamed {
    pub generation: Generation,
    /// Number of chunks published to the step entry
    pub chunks: usize,
}

/// Run `request`, publishing the chosen channel to entry `label` of step
/// `step_id` as `PENDING` chunk by chunk.
///
/// Buffered text is flushed even when generation fails, so the last partial
/// output stays visible.
pub(crate) async fn stream_into_step(
    backend: &dyn LlmBackend,
    settings: &TaskSettings,
    request: GenerationRequest,
    scope: &TaskScope<'_>,
    step_id: u64,
    label: &str,
    channel: Channel,
) -> Result<Streamed, TaskError> {
    let events = scope.events;
    let chunking = &settings.chunking;
    let mut buffer = ChunkBuffer::new(
        chunking.threshold,
        chunking.break_on.iter().map(String::as_str),
        |_chunk: &str, full: &str| {
            upsert_step_entry(events, step_id, label, full.into(), StepStatus::Pending);
        },
    );
    if let Some(limit) = chunking.hard_limit {
        buffer = buffer.with_hard_limit(limit);
    }

    let result = backend
        .generate(
            settings.request(request),
            scope.signal,
            &mut |delta: StreamDelta<'_>| match (channel, delta) {
                (Channel::Reasoning, StreamDelta::Reasoning(s)) | (Channel::Text, StreamDelta::Text(s)) => {
                    buffer.add(s);
                }
                _ => {}
            },
        )
        .await;
    buffer.flush();

    Ok(Streamed {
        generation: result?,
        chunks: buffer.flush_count(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use stepwise_events::EventStore;
    use stepwise_orchestrator::MemoryTracer;
    use stepwise_task_api::{Context, TaskScope};
    use stepwise_utils::CancellationSignal;

    /// Owns everything a `TaskScope` borrows.
    pub(crate) struct Harness {
        pub context: Context,
        pub events: EventStore,
        pub signal: CancellationSignal,
        pub tracer: MemoryTracer,
    }

    impl Harness {
        pub(crate) fn new(context: Context) -> Self {
            Self {
                context,
                events: EventStore::new(),
                signal: CancellationSignal::new(),
                tracer: MemoryTracer::new(),
            }
        }

        pub(crate) fn scope<'a>(&'a mut self, task: &'a str) -> TaskScope<'a> {
            TaskScope {
                context: &mut self.context,
                events: &self.events,
                signal: &self.signal,
                tracer: &self.tracer,
                run_id: "test-run",
                task,
                step_index: 0,
            }
        }
    }
}
