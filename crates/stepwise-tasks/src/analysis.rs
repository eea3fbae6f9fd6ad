//! The `analysis` task.
//!
//! Reviews the research findings before the report is written, streaming the
//! model's reasoning into step entry `reasoning`. On failure the run falls
//! back to the writer, which then works from the raw findings.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use stepwise_events::{
    StepStatus, append_sources, next_step_id, set_entry_status, set_step_status,
    upsert_step_entry,
};
use stepwise_llm::{GenerationRequest, LlmBackend, Message};
use stepwise_task_api::{Recovery, Route, Task, TaskOutput, TaskScope, TraceSpan};
use stepwise_utils::TaskError;

use crate::error_handler::record_failure;
use crate::prompt::{analysis_prompt, today};
use crate::{ANALYSIS, Channel, TaskSettings, WRITER, keys, stream_into_step};

pub const REASONING_ENTRY: &str = "reasoning";

pub struct AnalysisTask {
    backend: Arc<dyn LlmBackend>,
    settings: TaskSettings,
}

impl AnalysisTask {
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, settings: TaskSettings) -> Self {
        Self { backend, settings }
    }
}

impl std::fmt::Debug for AnalysisTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisTask")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Conversation for the model. Without prior messages the question is sent
/// as the only user turn.
pub(crate) fn conversation(messages: Vec<Message>, question: &str) -> Vec<Message> {
    if messages.is_empty() {
        vec![Message::user(question)]
    } else {
        messages
    }
}

#[async_trait]
impl Task for AnalysisTask {
    fn name(&self) -> &str {
        ANALYSIS
    }

    fn successors(&self) -> Vec<&str> {
        vec![WRITER]
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        // Allocated before any read can fail, so a failure marks this task's step.
        let step_id = next_step_id(scope.events);
        scope.context.set_value(keys::CURRENT_STEP_ID, json!(step_id));

        let question = scope
            .context
            .require(keys::QUESTION)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let messages: Vec<Message> = scope.context.get_as(keys::MESSAGES)?;
        let summaries: Vec<String> = scope.context.get_as(keys::SUMMARIES)?;
        let sources: Vec<Value> = scope.context.get_as(keys::SOURCES)?;

        let prompt = analysis_prompt(&question, &summaries, today());
        let request = GenerationRequest::new(
            self.settings.model.clone(),
            conversation(messages, &question),
        )
        .with_system(prompt.clone());

        let streamed = stream_into_step(
            self.backend.as_ref(),
            &self.settings,
            request,
            scope,
            step_id,
            REASONING_ENTRY,
            Channel::Reasoning,
        )
        .await?;
        let analysis = streamed.generation.text;

        // Models without a reasoning channel: show the analysis itself.
        if streamed.chunks == 0 {
            upsert_step_entry(
                scope.events,
                step_id,
                REASONING_ENTRY,
                json!(analysis),
                StepStatus::Completed,
            );
        } else {
            set_entry_status(scope.events, step_id, REASONING_ENTRY, StepStatus::Completed);
        }
        set_step_status(scope.events, step_id, StepStatus::Completed);
        append_sources(scope.events, sources);

        scope.context.set_value(keys::ANALYSIS, json!(analysis));
        scope.trace(
            TraceSpan::new(ANALYSIS)
                .with_input(prompt)
                .with_output(analysis.as_str())
                .with_metadata(json!({
                    "question": question,
                    "prevSummaries": summaries,
                    "model": streamed.generation.model_used,
                })),
        );

        Ok(json!({
            "queries": [],
            "analysis": analysis,
            "stepId": step_id,
        }))
    }

    async fn on_error(&self, error: &TaskError, scope: &mut TaskScope<'_>) -> Recovery {
        record_failure(error, scope);
        Recovery::Route(Route::next(WRITER))
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        Route::next(WRITER)
    }
}
