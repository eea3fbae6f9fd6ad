use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::exit_codes::ExitCode;
use crate::redaction::{SecretRedactor, default_redactor};

/// Library-level error type with user-friendly reporting.
///
/// `StepwiseError` gathers every failure a caller of the library or the CLI
/// can observe:
///
/// | Variant | Description |
/// |---------|-------------|
/// | `Config` | Configuration file or CLI argument errors |
/// | `Graph` | Task registration and lookup errors |
/// | `Run` | A run terminated without reaching `Route::End` |
/// | `Llm` | Backend construction or invocation errors outside a run |
///
/// Use [`display_for_user()`](Self::display_for_user) for formatted output and
/// [`to_exit_code()`](Self::to_exit_code) for the CLI exit status. Library code
/// never calls `std::process::exit()`.
#[derive(Error, Debug)]
pub enum StepwiseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Run failed: {0}")]
    Run(#[from] RunError),

    #[error("LLM backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for grouping in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Registry,
    TaskExecution,
    UpstreamModel,
    Cancellation,
    ResourceLimits,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Registry => write!(f, "Task Registry"),
            Self::TaskExecution => write!(f, "Task Execution"),
            Self::UpstreamModel => write!(f, "Upstream Model"),
            Self::Cancellation => write!(f, "Cancellation"),
            Self::ResourceLimits => write!(f, "Resource Limits"),
            Self::Internal => write!(f, "Internal"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration discovery failed: {reason}")]
    DiscoveryFailed { reason: String },

    #[error("Configuration validation failed: {} errors", .errors.len())]
    ValidationFailed { errors: Vec<String> },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => {
                format!("Configuration file has invalid format: {reason}")
            }
            Self::InvalidValue { key, value } => {
                format!("Configuration '{key}' has invalid value: {value}")
            }
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
            Self::DiscoveryFailed { reason } => {
                format!("Failed to discover configuration: {reason}")
            }
            Self::ValidationFailed { errors } => format!(
                "Configuration validation failed with {} errors: {}",
                errors.len(),
                errors.join(", ")
            ),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidFile(_) => Some(
                "Configuration files must be valid TOML with [run], [chunking] and [llm] sections."
                    .to_string(),
            ),
            Self::NotFound { .. } | Self::DiscoveryFailed { .. } => Some(
                "stepwise searches for .stepwise/config.toml starting from the current directory upward."
                    .to_string(),
            ),
            Self::InvalidValue { key, .. } => Some(format!(
                "The '{key}' configuration option has specific format requirements."
            )),
            Self::ValidationFailed { .. } => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax using a TOML validator".to_string(),
                "Compare with the example configuration in the README".to_string(),
            ],
            Self::InvalidValue { key, .. } => match key.as_str() {
                "chunking.threshold" | "run.max_steps" | "run.event_capacity" => {
                    vec!["Use a positive integer value".to_string()]
                }
                "llm.provider" => vec!["Use 'openai' or 'scripted' as the provider".to_string()],
                "llm.temperature" => vec!["Use a value between 0.0 and 2.0".to_string()],
                _ => vec![
                    "Check the documentation for valid values for this option".to_string(),
                    "Remove the option to use the default value".to_string(),
                ],
            },
            Self::NotFound { .. } => vec![
                "Create .stepwise/config.toml in your project root".to_string(),
                "Pass --config with an explicit path".to_string(),
            ],
            Self::DiscoveryFailed { .. } => vec![
                "Check file permissions in the current directory and its parents".to_string(),
            ],
            Self::ValidationFailed { errors } => errors
                .iter()
                .map(|e| format!("Fix: {e}"))
                .collect(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Task registration and lookup errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{name}' is already registered")]
    DuplicateTaskName { name: String },

    #[error("Unknown task '{name}'{}", referrer_suffix(.referenced_by))]
    UnknownTask {
        name: String,
        referenced_by: Option<String>,
    },
}

fn referrer_suffix(referenced_by: &Option<String>) -> String {
    referenced_by
        .as_ref()
        .map(|r| format!(" (routed to by '{r}')"))
        .unwrap_or_default()
}

impl UserFriendlyError for GraphError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::DuplicateTaskName { .. } => {
                Some("Task names are unique within a task graph.".to_string())
            }
            Self::UnknownTask { .. } => {
                Some("Every routed-to task must be registered before the graph is built.".to_string())
            }
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::DuplicateTaskName { name } => {
                vec![format!("Rename one of the tasks registered as '{name}'")]
            }
            Self::UnknownTask { .. } => vec![
                "Run 'stepwise tasks' to list registered tasks".to_string(),
                "Check the --entry flag and [run].entry_task".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Registry
    }
}

/// Errors reading or writing the per-run context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context key '{key}' does not hold a {expected}: {message}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        message: String,
    },

    #[error("Value for context key '{key}' could not be serialized: {message}")]
    Serialization { key: String, message: String },
}

/// Errors returned by a task's `execute`
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Upstream model error: {0}")]
    UpstreamModel(#[from] LlmError),

    #[error("Required context key '{key}' is missing")]
    MissingContext { key: String },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Task panicked: {message}")]
    Panicked { message: String },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// True when the error stems from the cancellation signal.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::UpstreamModel(LlmError::Cancelled))
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Terminal run failures
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Unknown task '{name}'")]
    UnknownTask { name: String },

    #[error("Task '{task}' failed: {source}")]
    TaskFailed { task: String, source: TaskError },

    #[error("Run cancelled during task '{task}'")]
    Cancelled { task: String },

    #[error("Step limit of {limit} exceeded before task '{task}'")]
    StepLimitExceeded { limit: usize, task: String },

    #[error("Run aborted: {reason}")]
    Aborted { reason: String },
}

impl RunError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Name of the task the run stopped at, when one is known.
    #[must_use]
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::UnknownTask { name } => Some(name),
            Self::TaskFailed { task, .. }
            | Self::Cancelled { task }
            | Self::StepLimitExceeded { task, .. } => Some(task),
            Self::Aborted { .. } => None,
        }
    }
}

impl UserFriendlyError for RunError {
    fn user_message(&self) -> String {
        match self {
            Self::TaskFailed {
                task,
                source: TaskError::UpstreamModel(llm),
            } => format!("Task '{task}' failed: {}", llm.user_message()),
            _ => self.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::StepLimitExceeded { .. } => Some(
                "Runs are bounded by max_steps to stop routing cycles from running forever."
                    .to_string(),
            ),
            Self::TaskFailed {
                source: TaskError::UpstreamModel(llm),
                ..
            } => llm.context(),
            Self::Aborted { .. } => {
                Some("The run's worker stopped before producing an outcome.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::UnknownTask { .. } => {
                vec!["Run 'stepwise tasks' to list registered tasks".to_string()]
            }
            Self::StepLimitExceeded { .. } => vec![
                "Raise --max-steps or [run].max_steps".to_string(),
                "Check the routing of tasks that route back to themselves".to_string(),
            ],
            Self::TaskFailed {
                source: TaskError::UpstreamModel(llm),
                ..
            } => llm.suggestions(),
            Self::TaskFailed { .. } => {
                vec!["Re-run with --verbose for per-task logs".to_string()]
            }
            Self::Cancelled { .. } | Self::Aborted { .. } => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownTask { .. } => ErrorCategory::Registry,
            Self::TaskFailed {
                source: TaskError::UpstreamModel(_),
                ..
            } => ErrorCategory::UpstreamModel,
            Self::TaskFailed { .. } => ErrorCategory::TaskExecution,
            Self::Cancelled { .. } => ErrorCategory::Cancellation,
            Self::StepLimitExceeded { .. } => ErrorCategory::ResourceLimits,
            Self::Aborted { .. } => ErrorCategory::Internal,
        }
    }
}

/// Errors that can occur during LLM backend operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Transport-level failure (HTTP connectivity, malformed stream)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Generation stopped by the run's cancellation signal
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl UserFriendlyError for LlmError {
    fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("LLM transport error: {msg}"),
            Self::ProviderAuth(msg) => format!("LLM provider authentication failed: {msg}"),
            Self::ProviderQuota(msg) => format!("LLM provider quota exceeded: {msg}"),
            Self::ProviderOutage(msg) => format!("LLM provider service outage: {msg}"),
            Self::Timeout { duration } => format!("LLM invocation timed out after {duration:?}"),
            Self::Cancelled => "LLM generation was cancelled".to_string(),
            Self::Misconfiguration(msg) => format!("LLM configuration error: {msg}"),
            Self::Unsupported(msg) => format!("Unsupported LLM operation: {msg}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::ProviderAuth(_) => {
                Some("The provider rejected the configured credentials.".to_string())
            }
            Self::ProviderQuota(_) => Some("The provider is rate limiting requests.".to_string()),
            Self::ProviderOutage(_) | Self::Transport(_) => Some(
                "Transient failures are retried twice with exponential backoff before giving up."
                    .to_string(),
            ),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::ProviderAuth(_) | Self::Misconfiguration(_) => vec![
                "Check that the environment variable named by [llm].api_key_env is set"
                    .to_string(),
                "Use --dry-run to exercise the pipeline with the scripted backend".to_string(),
            ],
            Self::ProviderQuota(_) => vec!["Wait before retrying the request".to_string()],
            Self::ProviderOutage(_) | Self::Transport(_) | Self::Timeout { .. } => vec![
                "Retry later".to_string(),
                "Increase [llm].request_timeout_secs for slow models".to_string(),
            ],
            Self::Cancelled | Self::Unsupported(_) => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Misconfiguration(_) | Self::Unsupported(_) => ErrorCategory::Configuration,
            Self::Cancelled => ErrorCategory::Cancellation,
            _ => ErrorCategory::UpstreamModel,
        }
    }
}

impl UserFriendlyError for StepwiseError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(e) => e.user_message(),
            Self::Graph(e) => e.user_message(),
            Self::Run(e) => e.user_message(),
            Self::Llm(e) => e.user_message(),
            Self::Io(e) => format!("IO error: {e}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(e) => e.context(),
            Self::Graph(e) => e.context(),
            Self::Run(e) => e.context(),
            Self::Llm(e) => e.context(),
            Self::Io(_) => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(e) => e.suggestions(),
            Self::Graph(e) => e.suggestions(),
            Self::Run(e) => e.suggestions(),
            Self::Llm(e) => e.suggestions(),
            Self::Io(_) => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(e) => e.category(),
            Self::Graph(e) => e.category(),
            Self::Run(e) => e.category(),
            Self::Llm(e) => e.category(),
            Self::Io(_) => ErrorCategory::Internal,
        }
    }
}

impl StepwiseError {
    /// User-facing message with context and suggestions, redacted with the
    /// process-wide redactor.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        self.display_for_user_with_redactor(default_redactor())
    }

    #[must_use]
    pub fn display_for_user_with_redactor(&self, redactor: &SecretRedactor) -> String {
        let mut output = String::new();

        output.push_str(&format!("Error: {}\n", self.user_message()));

        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        redactor.redact_string(&output)
    }

    /// Map this error to the CLI exit code.
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            StepwiseError::Config(_) => ExitCode::CLI_ARGS,

            StepwiseError::Graph(GraphError::UnknownTask { .. }) => ExitCode::UNKNOWN_TASK,
            StepwiseError::Graph(GraphError::DuplicateTaskName { .. }) => ExitCode::INTERNAL,

            StepwiseError::Run(run_err) => match run_err {
                RunError::UnknownTask { .. } => ExitCode::UNKNOWN_TASK,
                RunError::TaskFailed {
                    source: TaskError::UpstreamModel(_),
                    ..
                } => ExitCode::UPSTREAM_MODEL,
                RunError::TaskFailed { .. } => ExitCode::TASK_FAILED,
                RunError::Cancelled { .. } => ExitCode::CANCELLED,
                RunError::StepLimitExceeded { .. } => ExitCode::STEP_LIMIT,
                RunError::Aborted { .. } => ExitCode::INTERNAL,
            },

            StepwiseError::Llm(llm_err) => match llm_err {
                LlmError::Misconfiguration(_) | LlmError::Unsupported(_) => ExitCode::CLI_ARGS,
                LlmError::Cancelled => ExitCode::CANCELLED,
                _ => ExitCode::UPSTREAM_MODEL,
            },

            StepwiseError::Io(_) => ExitCode::INTERNAL,
        }
    }
}
