//! Exit code constants for the stepwise CLI.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Run reached a terminal route |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `UNKNOWN_TASK` | Entry or routed task is not registered |
//! | 4 | `TASK_FAILED` | A task failed and its handler rethrew |
//! | 5 | `STEP_LIMIT` | The run exceeded its step limit |
//! | 70 | `UPSTREAM_MODEL` | The language model backend failed |
//! | 130 | `CANCELLED` | The run was cancelled (Ctrl-C or timeout) |

/// Process exit code.
///
/// The numeric values are part of the CLI contract.
///
/// ```rust
/// use stepwise_utils::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::CANCELLED, ExitCode::from_i32(130));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - the run reached `Route::End`
    pub const SUCCESS: ExitCode = ExitCode(codes::SUCCESS);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(codes::INTERNAL);

    /// CLI arguments error - invalid arguments or configuration
    pub const CLI_ARGS: ExitCode = ExitCode(codes::CLI_ARGS);

    /// Unknown task - the entry task or a routed-to task is not registered
    pub const UNKNOWN_TASK: ExitCode = ExitCode(codes::UNKNOWN_TASK);

    /// Task failed - a task error was not recovered by its handler
    pub const TASK_FAILED: ExitCode = ExitCode(codes::TASK_FAILED);

    /// Step limit - the run executed more tasks than allowed
    pub const STEP_LIMIT: ExitCode = ExitCode(codes::STEP_LIMIT);

    /// Upstream model failure - the LLM backend returned an error
    pub const UPSTREAM_MODEL: ExitCode = ExitCode(codes::UPSTREAM_MODEL);

    /// Cancelled - interrupted by the user or a deadline
    pub const CANCELLED: ExitCode = ExitCode(codes::CANCELLED);

    /// Get the numeric exit code value for `std::process::exit()`.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Create an ExitCode from a raw i32 value.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == codes::SUCCESS
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

/// Raw exit code values.
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const INTERNAL: i32 = 1;
    pub const CLI_ARGS: i32 = 2;
    pub const UNKNOWN_TASK: i32 = 3;
    pub const TASK_FAILED: i32 = 4;
    pub const STEP_LIMIT: i32 = 5;
    pub const UPSTREAM_MODEL: i32 = 70;
    pub const CANCELLED: i32 = 130;
}
