//! Core types for LLM backend abstraction

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stepwise_utils::{CancellationSignal, LlmError};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Input to a single generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Model to use; empty means the backend's default
    pub model: String,
    /// Instructions sent ahead of the conversation
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Upper bound for the whole request, including the streamed body
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            max_tokens: None,
            temperature: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// System prompt (if any) followed by the conversation.
    #[must_use]
    pub fn full_messages(&self) -> Vec<Message> {
        self.system
            .iter()
            .map(|s| Message::system(s.clone()))
            .chain(self.messages.iter().cloned())
            .collect()
    }
}

/// Result of a completed generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Final answer text
    pub text: String,
    /// Reasoning trace, empty for models that do not stream one
    pub reasoning: String,
    pub provider: String,
    pub model_used: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
    pub finish_reason: Option<String>,
}

impl Generation {
    #[must_use]
    pub fn new(provider: impl Into<String>, model_used: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_used: model_used.into(),
            ..Self::default()
        }
    }
}

/// Incremental piece of a streamed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDelta<'a> {
    Text(&'a str),
    Reasoning(&'a str),
}

impl StreamDelta<'_> {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(s) | Self::Reasoning(s) => s,
        }
    }
}

/// Trait for LLM backend implementations
///
/// Deltas are delivered to `on_delta` synchronously, in stream order, before
/// `generate` returns. The accumulated [`Generation`] holds the same text.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Provider name, e.g. `"openai"`
    fn name(&self) -> &str;

    /// Run one generation, streaming deltas as they arrive.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Cancelled` once `signal` fires, and the
    /// transport/provider variants for everything else.
    async fn generate(
        &self,
        request: GenerationRequest,
        signal: &CancellationSignal,
        on_delta: &mut (dyn for<'d> FnMut(StreamDelta<'d>) + Send),
    ) -> Result<Generation, LlmError>;
}
