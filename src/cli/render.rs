//! Terminal rendering for runs: streamed step progress and outcome reports.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};

use stepwise_events::{STEPS_KEY, StepStatus, StepsState};
use stepwise_utils::redaction::redact_user_string;

use crate::{EventUpdate, RunOutcome, TaskGraph};

/// Prints the growing text of each step entry as it streams.
///
/// Entries are rewritten in full on every flush, so only the part not yet
/// printed is written. A header is printed whenever output switches to a
/// different entry.
#[derive(Debug)]
pub struct ProgressPrinter<W: Write> {
    out: W,
    printed: BTreeMap<(u64, String), usize>,
    current: Option<(u64, String)>,
}

impl<W: Write> ProgressPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: BTreeMap::new(),
            current: None,
        }
    }

    pub fn on_update(&mut self, update: &EventUpdate) -> io::Result<()> {
        if update.key != STEPS_KEY {
            return Ok(());
        }
        let Ok(steps) = serde_json::from_value::<StepsState>(update.value.clone()) else {
            tracing::debug!(seq = update.seq, "ignoring malformed steps update");
            return Ok(());
        };

        for (id, step) in &steps {
            for (label, entry) in &step.steps {
                let text = match &entry.data {
                    Value::String(s) => s.clone(),
                    Value::Null => continue,
                    other => other.to_string(),
                };
                self.write_entry(*id, label, &text, entry.status)?;
            }
        }
        self.out.flush()
    }

    fn write_entry(
        &mut self,
        step_id: u64,
        label: &str,
        text: &str,
        status: StepStatus,
    ) -> io::Result<()> {
        let key = (step_id, label.to_string());
        let done = self.printed.get(&key).copied().unwrap_or(0);
        // Entries only grow by appending; anything else is reprinted whole.
        let fresh = text.get(done..).unwrap_or(text);
        if fresh.is_empty() {
            return Ok(());
        }

        if self.current.as_ref() != Some(&key) {
            if self.current.is_some() {
                writeln!(self.out)?;
            }
            let marker = match status {
                StepStatus::Error => "✗ ",
                _ => "",
            };
            writeln!(self.out, "{marker}[step {step_id} · {label}]")?;
            self.current = Some(key.clone());
        }
        write!(self.out, "{fresh}")?;
        self.printed.insert(key, text.len());
        Ok(())
    }

    /// Terminate the last entry's line.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.current.take().is_some() {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

/// Feed `rx` into `printer` until every sender is gone.
pub async fn print_progress<W: Write>(
    mut rx: broadcast::Receiver<EventUpdate>,
    mut printer: ProgressPrinter<W>,
) {
    loop {
        match rx.recv().await {
            Ok(update) => {
                if let Err(e) = printer.on_update(&update) {
                    tracing::debug!(error = %e, "stopping progress output");
                    return;
                }
            }
            // Every update carries the whole key value, so the next one resyncs.
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "progress stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    let _ = printer.finish();
}

/// JSON report of a finished run.
#[must_use]
pub fn outcome_json(outcome: &RunOutcome) -> Value {
    json!({
        "run_id": outcome.run_id.to_string(),
        "status": outcome.label(),
        "output": outcome.output(),
        "error": outcome.error().map(|e| redact_user_string(&e.to_string())),
        "context": outcome.context.to_json(),
        "events": outcome.events.to_json(),
        "executions": outcome.executions,
    })
}

/// One line per execution, e.g. `analysis  completed  812ms  → writer`.
#[must_use]
pub fn execution_summary(outcome: &RunOutcome) -> String {
    outcome
        .executions
        .iter()
        .map(|e| {
            let status = serde_json::to_value(e.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let mut line = format!("  {:<10} {:<10} {:>6}ms", e.task, status, e.duration_ms);
            if let Some(route) = &e.route {
                line.push_str(&format!("  → {route}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Registered tasks with their declared successors.
#[must_use]
pub fn tasks_json(graph: &TaskGraph) -> Value {
    Value::Array(
        graph
            .iter()
            .map(|(name, task)| json!({ "name": name, "successors": task.successors() }))
            .collect(),
    )
}

#[must_use]
pub fn tasks_table(graph: &TaskGraph) -> String {
    graph
        .iter()
        .map(|(name, task)| {
            let successors = task.successors();
            if successors.is_empty() {
                name.to_string()
            } else {
                format!("{name} → {}", successors.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
