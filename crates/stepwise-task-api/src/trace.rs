//! Tracer boundary.
//!
//! Tracers receive one span per task execution (and any spans tasks record
//! themselves). A failing tracer never changes a run's outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub metadata: Value,
}

impl TraceSpan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: Value::Null,
            output: Value::Null,
            metadata: Value::Null,
        }
    }

    #[must_use]
    pub fn with_input(mut self, input: impl Into<Value>) -> Self {
        self.input = input.into();
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<Value>) -> Self {
        self.output = output.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<Value>) -> Self {
        self.metadata = metadata.into();
        self
    }
}

pub trait Tracer: Send + Sync {
    fn span(&self, span: TraceSpan) -> anyhow::Result<()>;
}

/// Send `span` to `tracer`, logging failures at warn.
pub fn record(tracer: &dyn Tracer, span: TraceSpan, run_id: &str) {
    let name = span.name.clone();
    if let Err(e) = tracer.span(span) {
        tracing::warn!(run_id = %run_id, span = %name, error = %e, "tracer failed to record span");
    }
}
