//! Error handling shared by the research tasks.

use serde_json::json;

use stepwise_events::{StepStatus, next_step_id, set_step_status, upsert_step_entry};
use stepwise_task_api::TaskScope;
use stepwise_utils::TaskError;
use stepwise_utils::redaction::redact_user_string;

use crate::keys;

/// Label of the step entry holding the failure message
pub const ERROR_ENTRY: &str = "error";

/// Mark the executing task's step as `ERROR` and record the redacted message
/// in the step and under Context `error`.
///
/// Returns the step id that was marked.
pub fn record_failure(error: &TaskError, scope: &mut TaskScope<'_>) -> u64 {
    let step_id = scope
        .context
        .get(keys::CURRENT_STEP_ID)
        .as_u64()
        .unwrap_or_else(|| next_step_id(scope.events));
    let message = redact_user_string(&error.to_string());

    tracing::warn!(
        run_id = %scope.run_id,
        task = %scope.task,
        step_id,
        error = %message,
        "marking step as failed"
    );

    upsert_step_entry(
        scope.events,
        step_id,
        ERROR_ENTRY,
        json!(message),
        StepStatus::Error,
    );
    set_step_status(scope.events, step_id, StepStatus::Error);
    scope.context.set_value(
        keys::ERROR,
        json!({ "task": scope.task, "message": message, "stepId": step_id }),
    );
    step_id
}
