//! Step progress and source lists, in the shape consumers render:
//!
//! ```json
//! {
//!   "steps": { "0": { "id": 0, "status": "PENDING",
//!                     "steps": { "reasoning": { "data": "...", "status": "PENDING" } } } },
//!   "sources": [ ... ]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{EventSnapshot, EventStore};

pub const STEPS_KEY: &str = "steps";
pub const SOURCES_KEY: &str = "sources";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepEntry {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Step {
    pub id: u64,
    #[serde(default)]
    pub status: StepStatus,
    /// Labelled sub-entries such as `reasoning`, `answer` or `error`.
    #[serde(default)]
    pub steps: BTreeMap<String, StepEntry>,
}

impl Step {
    #[must_use]
    pub fn entry(&self, label: &str) -> Option<&StepEntry> {
        self.steps.get(label)
    }
}

pub type StepsState = BTreeMap<u64, Step>;

/// Id for the step a task is about to record: the number of steps so far.
#[must_use]
pub fn next_step_id(events: &EventStore) -> u64 {
    events
        .get_typed::<StepsState>(STEPS_KEY)
        .map_or(0, |steps| steps.len() as u64)
}

/// Create or replace entry `label` of step `step_id`.
///
/// A missing step is created as `PENDING`; an existing step keeps its status.
pub fn upsert_step_entry(
    events: &EventStore,
    step_id: u64,
    label: &str,
    data: Value,
    status: StepStatus,
) {
    let label = label.to_string();
    events.update_typed::<StepsState, _>(STEPS_KEY, move |mut steps| {
        let step = steps.entry(step_id).or_insert_with(|| Step {
            id: step_id,
            ..Step::default()
        });
        step.steps.insert(
            label.clone(),
            StepEntry {
                data: data.clone(),
                status,
            },
        );
        steps
    });
}

/// Set the status of step `step_id`, creating it if needed.
///
/// A terminal status compacts the `steps` patch log, bounding it by the
/// number of finished steps rather than the number of streamed chunks.
pub fn set_step_status(events: &EventStore, step_id: u64, status: StepStatus) {
    events.update_typed::<StepsState, _>(STEPS_KEY, move |mut steps| {
        steps
            .entry(step_id)
            .or_insert_with(|| Step {
                id: step_id,
                ..Step::default()
            })
            .status = status;
        steps
    });
    if status != StepStatus::Pending {
        events.compact(STEPS_KEY);
    }
}

/// Set the status of an existing entry; absent steps or entries are left alone.
pub fn set_entry_status(events: &EventStore, step_id: u64, label: &str, status: StepStatus) {
    let label = label.to_string();
    events.update_typed::<StepsState, _>(STEPS_KEY, move |mut steps| {
        if let Some(entry) = steps
            .get_mut(&step_id)
            .and_then(|step| step.steps.get_mut(&label))
        {
            entry.status = status;
        }
        steps
    });
}

/// Append `sources` to the `sources` list.
pub fn append_sources(events: &EventStore, sources: Vec<Value>) {
    if sources.is_empty() {
        return;
    }
    events.update_typed::<Vec<Value>, _>(SOURCES_KEY, move |mut current| {
        current.extend(sources.iter().cloned());
        current
    });
}

impl EventSnapshot {
    /// Typed view of the `steps` key; empty when absent or malformed.
    #[must_use]
    pub fn steps(&self) -> StepsState {
        self.get(STEPS_KEY)
            .and_then(|v| StepsState::deserialize(v).ok())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn sources(&self) -> Vec<Value> {
        self.get(SOURCES_KEY)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}
