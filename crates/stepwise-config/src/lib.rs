//! Configuration for stepwise: discovery, precedence, and validation.

pub mod config;

pub use config::{
    ChunkingConfig, CliArgs, Config, ConfigSource, LlmConfig, Provider, RunConfig,
};
