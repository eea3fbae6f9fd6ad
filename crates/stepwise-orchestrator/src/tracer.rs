//! Built-in tracers.

use std::sync::{Mutex, PoisonError};

use stepwise_task_api::{TraceSpan, Tracer};

/// Emits each span as a `tracing` event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn span(&self, span: TraceSpan) -> anyhow::Result<()> {
        let output_bytes = serde_json::to_string(&span.output)?.len();
        tracing::debug!(
            target: "stepwise::trace",
            span = %span.name,
            metadata = %span.metadata,
            output_bytes,
            "trace span"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn span(&self, _span: TraceSpan) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Collects spans in memory, e.g. for tests and `--json` output.
#[derive(Debug, Default)]
pub struct MemoryTracer {
    spans: Mutex<Vec<TraceSpan>>,
}

impl MemoryTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn spans(&self) -> Vec<TraceSpan> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn span_names(&self) -> Vec<String> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }
}

impl Tracer for MemoryTracer {
    fn span(&self, span: TraceSpan) -> anyhow::Result<()> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
        Ok(())
    }
}
