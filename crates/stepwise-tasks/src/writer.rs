//! The `writer` task: streams the final answer into step entry `answer`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use stepwise_events::{
    StepStatus, next_step_id, set_entry_status, set_step_status, upsert_step_entry,
};
use stepwise_llm::{GenerationRequest, LlmBackend, Message};
use stepwise_task_api::{Recovery, Route, Task, TaskOutput, TaskScope, TraceSpan};
use stepwise_utils::TaskError;

use crate::analysis::conversation;
use crate::error_handler::record_failure;
use crate::prompt::{today, writer_prompt};
use crate::{Channel, TaskSettings, WRITER, keys, stream_into_step};

pub const ANSWER_ENTRY: &str = "answer";

pub struct WriterTask {
    backend: Arc<dyn LlmBackend>,
    settings: TaskSettings,
}

impl WriterTask {
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, settings: TaskSettings) -> Self {
        Self { backend, settings }
    }
}

impl std::fmt::Debug for WriterTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterTask")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
impl Task for WriterTask {
    fn name(&self) -> &str {
        WRITER
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
        let analysis = scope.context.get_str(keys::ANALYSIS).to_string();
        let summaries: Vec<String> = scope.context.get_as(keys::SUMMARIES)?;
        let messages: Vec<Message> = scope.context.get_as(keys::MESSAGES)?;

        let prompt = writer_prompt(&question, Some(&analysis), &summaries, today());
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
            ANSWER_ENTRY,
            Channel::Text,
        )
        .await?;
        let answer = streamed.generation.text;

        if streamed.chunks == 0 {
            upsert_step_entry(
                scope.events,
                step_id,
                ANSWER_ENTRY,
                json!(answer),
                StepStatus::Completed,
            );
        } else {
            set_entry_status(scope.events, step_id, ANSWER_ENTRY, StepStatus::Completed);
        }
        set_step_status(scope.events, step_id, StepStatus::Completed);
        scope.context.set_value(keys::ANSWER, json!(answer));

        scope.trace(
            TraceSpan::new(WRITER)
                .with_input(prompt)
                .with_output(answer.as_str())
                .with_metadata(json!({
                    "question": question,
                    "usedAnalysis": !analysis.trim().is_empty(),
                    "model": streamed.generation.model_used,
                })),
        );

        Ok(json!({ "answer": answer, "stepId": step_id }))
    }

    async fn on_error(&self, error: &TaskError, scope: &mut TaskScope<'_>) -> Recovery {
        record_failure(error, scope);
        Recovery::Rethrow
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        Route::End
    }
}
