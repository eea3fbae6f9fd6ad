//! CLI entry point and dispatch logic
//!
//! This module owns the `run()` function which:
//! - Parses CLI arguments
//! - Builds CliArgs and discovers Config
//! - Creates the tokio runtime
//! - Dispatches to command handlers
//! - Handles all error output

use std::io;
use std::sync::Arc;

use clap::Parser;
use serde_json::{Value, json};

use stepwise_tasks::keys;
use stepwise_utils::logging;

use super::args::{Cli, Commands};
use super::render::{
    ProgressPrinter, execution_summary, outcome_json, print_progress, tasks_json, tasks_table,
};
use crate::{
    CliArgs, Config, Context, ExitCode, Message, Orchestrator, ScriptedBackend, StepwiseError,
    research_graph, run_options,
};

/// Provider forced by `--dry-run`
const DRY_RUN_PROVIDER: &str = "scripted";

/// Main CLI execution function.
///
/// This function handles ALL output including errors. On error it prints a
/// user-facing report to stderr and returns the exit code; `main` only maps
/// that code to the process exit status.
pub fn run() -> Result<(), ExitCode> {
    execute(Cli::parse())
}

/// Execute already-parsed arguments.
pub fn execute(cli: Cli) -> Result<(), ExitCode> {
    let args = cli_args(&cli);

    let config = match Config::discover(&args) {
        Ok(config) => config,
        Err(err) => return Err(report(StepwiseError::Config(err))),
    };

    // Fails only when a subscriber is already installed by an embedding host.
    let _ = if matches!(cli.command, Commands::Run { json: true, .. }) {
        logging::init_json_tracing(cli.verbose)
    } else {
        logging::init_tracing(cli.verbose)
    };

    match cli.command {
        Commands::Config { json } => show_config(&config, json),
        Commands::Tasks { json } => list_tasks(&config, json),
        Commands::Run {
            question,
            summaries,
            sources,
            messages,
            json,
            ..
        } => {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("✗ Failed to create async runtime: {e}");
                    return Err(ExitCode::INTERNAL);
                }
            };
            let context = initial_context(&question, summaries, &sources, &messages);
            rt.block_on(run_pipeline(&config, context, json))
        }
    }
}

/// Map parsed flags onto the configuration layer.
#[must_use]
pub fn cli_args(cli: &Cli) -> CliArgs {
    let mut args = CliArgs {
        config_path: cli.config.clone(),
        model: cli.model.clone(),
        llm_provider: cli.llm_provider.clone(),
        ..CliArgs::default()
    };

    if let Commands::Run {
        entry,
        dry_run,
        timeout,
        max_steps,
        ..
    } = &cli.command
    {
        args.entry_task = entry.clone();
        args.timeout_secs = *timeout;
        args.max_steps = *max_steps;
        if *dry_run {
            args.llm_provider = Some(DRY_RUN_PROVIDER.to_string());
        }
    }
    args
}

/// Initial run context for the research pipeline.
#[must_use]
pub fn initial_context(
    question: &str,
    summaries: Vec<String>,
    sources: &[String],
    messages: &[Message],
) -> Context {
    let mut context = Context::new();
    context.set_value(keys::QUESTION, json!(question));
    context.set_value(keys::SUMMARIES, json!(summaries));
    context.set_value(
        keys::SOURCES,
        Value::Array(sources.iter().map(|s| parse_source(s)).collect()),
    );
    context.set_value(
        keys::MESSAGES,
        Value::Array(
            messages
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                .collect(),
        ),
    );
    context
}

/// A JSON object is taken as-is; anything else is treated as a URL.
fn parse_source(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "url": raw }),
    }
}

async fn run_pipeline(config: &Config, context: Context, json: bool) -> Result<(), ExitCode> {
    let backend = stepwise_llm::from_config(&config.llm).map_err(|e| report(e.into()))?;
    let graph = research_graph(backend, config).map_err(|e| report(e.into()))?;
    let orchestrator = Orchestrator::new(graph).with_options(run_options(config));

    tracing::debug!(provider = %config.llm.provider, model = %config.llm.model, "using backend");
    let mut handle = orchestrator.start_run(config.run.entry_task.clone(), context);

    let progress = match handle.take_subscription() {
        Some(rx) if !json => Some(tokio::spawn(print_progress(
            rx,
            ProgressPrinter::new(io::stdout()),
        ))),
        _ => None,
    };

    let signal = handle.signal().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n✗ Interrupted, cancelling run...");
            signal.cancel();
        }
    });

    let outcome = handle.result().await;
    interrupt.abort();
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    if json {
        match serde_json::to_string_pretty(&outcome_json(&outcome)) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("✗ Failed to serialize run outcome: {e}");
                return Err(ExitCode::INTERNAL);
            }
        }
    } else if !outcome.executions.is_empty() {
        eprintln!("\n{}", execution_summary(&outcome));
    }

    let run_id = outcome.run_id;
    match outcome.result {
        Ok(_) => {
            if !json {
                eprintln!("✓ Run {run_id} finished");
            }
            Ok(())
        }
        Err(err) => Err(report(StepwiseError::Run(err))),
    }
}

fn list_tasks(config: &Config, json: bool) -> Result<(), ExitCode> {
    // Listing never contacts a model.
    let graph =
        research_graph(Arc::new(ScriptedBackend::dry_run()), config).map_err(|e| report(e.into()))?;
    if json {
        print_json(&tasks_json(&graph))
    } else {
        println!("{}", tasks_table(&graph));
        Ok(())
    }
}

fn show_config(config: &Config, json: bool) -> Result<(), ExitCode> {
    let effective = config.effective_config();
    if json {
        let map: serde_json::Map<String, Value> = effective
            .into_iter()
            .map(|(key, (value, source))| (key, json!({ "value": value, "source": source })))
            .collect();
        return print_json(&Value::Object(map));
    }

    match &config.config_path {
        Some(path) => println!("# config file: {}", path.display()),
        None => println!("# no config file found"),
    }
    for (key, (value, source)) in effective {
        println!("{key} = {value}  ({source})");
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<(), ExitCode> {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{s}");
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Failed to serialize JSON: {e}");
            Err(ExitCode::INTERNAL)
        }
    }
}

/// Print the user-facing report for `err` and return its exit code.
fn report(err: StepwiseError) -> ExitCode {
    eprintln!("{}", err.display_for_user());
    err.to_exit_code()
}
