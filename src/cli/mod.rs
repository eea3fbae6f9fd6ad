//! Command-line interface for stepwise
//!
//! ## Module Structure
//!
//! - `args`: CLI argument definitions and parsing structures (clap)
//! - `run`: Main entry point and command dispatch
//! - `render`: Progress streaming and outcome reports

pub mod args;
pub mod render;
mod run;

pub use args::{Cli, Commands, build_cli, parse_message};
pub use run::{cli_args, execute, initial_context, run};
