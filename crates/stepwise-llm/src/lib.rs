//! LLM backend abstraction with streaming deltas
//!
//! Tasks talk to models through [`LlmBackend`]. Two providers ship:
//!
//! - **`openai`**: any OpenAI-compatible chat completions endpoint, streamed
//!   over server-sent events
//! - **`scripted`**: deterministic canned output for dry runs and tests

mod http_client;
mod openai_backend;
mod scripted_backend;
mod sse;
mod types;

use std::sync::Arc;

use stepwise_config::{LlmConfig, Provider};

pub use openai_backend::OpenAiCompatibleBackend;
pub use scripted_backend::ScriptedBackend;
pub use stepwise_utils::LlmError;
pub use types::{Generation, GenerationRequest, LlmBackend, Message, Role, StreamDelta};

/// Create the backend selected by `[llm] provider`.
///
/// # Errors
///
/// Returns `LlmError::Misconfiguration` if provider-specific settings are
/// invalid, e.g. the API key variable is unset.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn LlmBackend>, LlmError> {
    let backend: Arc<dyn LlmBackend> = match config.provider {
        Provider::OpenAi => Arc::new(OpenAiCompatibleBackend::new_from_config(config)?),
        Provider::Scripted => Arc::new(ScriptedBackend::dry_run()),
    };
    tracing::debug!(provider = backend.name(), model = %config.model, "LLM backend constructed");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: Provider) -> LlmConfig {
        LlmConfig {
            provider,
            model: "m".into(),
            base_url: "https://example.invalid/v1/chat/completions".into(),
            api_key_env: "STEPWISE_TEST_UNSET_API_KEY".into(),
            max_tokens: 16,
            temperature: 0.2,
            request_timeout_secs: 5,
            models: Default::default(),
        }
    }

    #[test]
    fn test_scripted_provider() {
        let backend = from_config(&config(Provider::Scripted)).unwrap();
        assert_eq!(backend.name(), "scripted");
    }

    #[test]
    fn test_openai_without_key_fails() {
        let err = from_config(&config(Provider::OpenAi)).err();
        assert!(matches!(err, Some(LlmError::Misconfiguration(_))));
    }
}
