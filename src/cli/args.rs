//! CLI argument definitions and parsing structures

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use crate::{Message, Role};

/// stepwise - streaming task pipelines for LLM-driven research
#[derive(Debug, Parser)]
#[command(name = "stepwise")]
#[command(about = "Run cooperative, streaming LLM task pipelines")]
#[command(long_about = r#"
stepwise runs a research question through a pipeline of LLM-driven tasks.
The analysis task reviews the gathered findings and streams its reasoning;
the writer task turns that analysis into the final answer. Progress is
printed as it streams.

EXAMPLES:
  # Research a question from two findings
  stepwise run "Is Rust fast?" --summary "benchmarks game results" --summary "TechEmpower"

  # Attach sources and prior conversation
  stepwise run "Compare the two" --source https://example.com/a \
      --message "user:Tell me about A" --message "assistant:A is ..."

  # Run without contacting a model
  stepwise run "What is stepwise?" --dry-run

  # Machine-readable outcome
  stepwise run "Is Rust fast?" --dry-run --json

  # Skip the analysis and go straight to the writer
  stepwise run "Is Rust fast?" --entry writer

  # List registered tasks
  stepwise tasks

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > config file > defaults
  Config file is discovered by searching upward from CWD for .stepwise/config.toml
  Use --config to specify an explicit config file path

EXIT CODES:
  0 success, 2 invalid arguments, 3 unknown task, 4 task failed,
  5 step limit exceeded, 70 upstream model error, 130 cancelled
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Model to use for every task
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// LLM provider (openai or scripted)
    #[arg(long, global = true)]
    pub llm_provider: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the research pipeline for a question
    Run {
        /// The question to research
        question: String,

        /// Research finding to analyse (repeatable)
        #[arg(long = "summary", value_name = "TEXT")]
        summaries: Vec<String>,

        /// Source as a URL or a JSON object (repeatable)
        #[arg(long = "source", value_name = "SOURCE")]
        sources: Vec<String>,

        /// Prior conversation turn as ROLE:TEXT (repeatable)
        #[arg(long = "message", value_name = "ROLE:TEXT", value_parser = parse_message)]
        messages: Vec<Message>,

        /// Task to start from
        #[arg(long)]
        entry: Option<String>,

        /// Use the scripted backend instead of contacting a model
        #[arg(long)]
        dry_run: bool,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Maximum task executions for this run
        #[arg(long)]
        max_steps: Option<usize>,

        /// Print the run outcome as JSON instead of streaming progress
        #[arg(long)]
        json: bool,
    },

    /// List registered tasks and their declared successors
    Tasks {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration and where each value came from
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse `ROLE:TEXT` into a conversation message.
pub fn parse_message(raw: &str) -> Result<Message, String> {
    let (role, content) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected ROLE:TEXT, got '{raw}'"))?;
    let role = Role::parse(role).ok_or_else(|| {
        format!("unknown role '{role}' (expected system, user or assistant)")
    })?;
    Ok(Message::new(role, content))
}

/// Build the clap command, for completions and documentation tooling.
#[must_use]
pub fn build_cli() -> clap::Command {
    Cli::command()
}
