//! Foundation utilities shared by every stepwise crate.

pub mod cancel;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod redaction;

pub use cancel::CancellationSignal;
pub use error::{
    ConfigError, ContextError, ErrorCategory, GraphError, LlmError, RunError, StepwiseError,
    TaskError, UserFriendlyError,
};
pub use exit_codes::ExitCode;
