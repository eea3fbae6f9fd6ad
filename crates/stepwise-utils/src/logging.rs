//! Logging and tracing setup for stepwise
//!
//! Logs go to stderr so stdout stays reserved for run output.

use std::io::IsTerminal;
use tracing::{Level, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::redaction::redact_user_string;

/// Check if colored output should be used.
///
/// Returns true only if stderr is a terminal and NO_COLOR is not set.
pub fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("stepwise=debug,info")
            } else {
                EnvFilter::try_new("stepwise=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Verbose mode adds targets and
/// span close events (which carry span timings).
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = default_filter(verbose);

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(use_color())
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(use_color())
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Initialize newline-delimited JSON logs, for `--json` runs.
pub fn init_json_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true),
        )
        .try_init()?;
    Ok(())
}

/// Span wrapping one task execution.
pub fn task_span(run_id: &str, task: &str, step: usize) -> tracing::Span {
    span!(
        Level::INFO,
        "task_execution",
        run_id = %run_id,
        task = %task,
        step = step,
    )
}

pub fn log_task_start(run_id: &str, task: &str, step: usize) {
    info!(run_id = %run_id, task = %task, step = step, "Starting task");
}

pub fn log_task_complete(run_id: &str, task: &str, duration_ms: u128) {
    info!(
        run_id = %run_id,
        task = %task,
        duration_ms = %duration_ms,
        "Task completed"
    );
}

/// Error messages are redacted before they reach the log.
pub fn log_task_error(run_id: &str, task: &str, error: &str, duration_ms: u128) {
    let sanitized_error = redact_user_string(error);
    error!(
        run_id = %run_id,
        task = %task,
        duration_ms = %duration_ms,
        error = %sanitized_error,
        "Task failed"
    );
}

pub fn log_run_finished(run_id: &str, steps: usize, outcome: &str, duration_ms: u128) {
    info!(
        run_id = %run_id,
        steps = steps,
        outcome = %outcome,
        duration_ms = %duration_ms,
        "Run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_span_has_name() {
        let span = task_span("run-1", "analysis", 0);
        // Without a subscriber the span is disabled, but creating it must not panic.
        let _guard = span.enter();
    }

    #[test]
    fn test_log_helpers_without_subscriber() {
        log_task_start("run-1", "analysis", 0);
        log_task_complete("run-1", "analysis", 12);
        log_task_error("run-1", "writer", "key sk-AAAAAAAAAAAAAAAAAAAAAAAAAA", 3);
        log_run_finished("run-1", 2, "completed", 15);
    }

    #[test]
    fn test_init_tracing_twice_fails_gracefully() {
        let _ = init_tracing(false);
        // Only one global subscriber can be installed per process.
        assert!(init_tracing(true).is_err());
        assert!(init_json_tracing(false).is_err());
    }
}
