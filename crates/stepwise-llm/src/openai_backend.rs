//! OpenAI-compatible streaming chat completions backend
//!
//! Works with any endpoint that speaks the chat completions wire format with
//! `stream: true`, including providers that stream a separate reasoning
//! channel (`reasoning_content` or `reasoning`).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tracing::debug;

use stepwise_config::LlmConfig;
use stepwise_utils::redaction::redact_user_string;
use stepwise_utils::{CancellationSignal, LlmError};

use crate::http_client::HttpClient;
use crate::sse::{SseDecoder, SseEvent, parse_chunk};
use crate::types::{Generation, GenerationRequest, LlmBackend, Message, StreamDelta};

const PROVIDER: &str = "openai";

#[derive(Debug, Clone)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct OpenAiCompatibleBackend {
    client: HttpClient,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

impl fmt::Debug for OpenAiCompatibleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatibleBackend")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_params", &self.default_params)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleBackend {
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: HttpClient::with_max_timeout(timeout)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            default_params: HttpParams {
                max_tokens,
                temperature,
                timeout,
            },
        })
    }

    /// Build from `[llm]` configuration, reading the key from `api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` when the key variable is unset or
    /// empty.
    pub fn new_from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LlmError::Misconfiguration(format!(
                    "API key not found in environment variable '{}'. \
                     Set it or configure a different api_key_env in [llm].",
                    config.api_key_env
                ))
            })?;

        Self::new(
            api_key,
            config.base_url.clone(),
            config.model.clone(),
            config.max_tokens,
            config.temperature,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn build_body(&self, request: &GenerationRequest) -> ChatRequest {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };
        ChatRequest {
            model,
            messages: request.full_messages(),
            max_tokens: request.max_tokens.unwrap_or(self.default_params.max_tokens),
            temperature: request
                .temperature
                .unwrap_or(self.default_params.temperature),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        signal: &CancellationSignal,
        on_delta: &mut (dyn for<'d> FnMut(StreamDelta<'d>) + Send),
    ) -> Result<Generation, LlmError> {
        let body = self.build_body(&request);
        let timeout = request.timeout.unwrap_or(self.default_params.timeout);

        debug!(
            provider = PROVIDER,
            model = %body.model,
            messages = body.messages.len(),
            max_tokens = body.max_tokens,
            temperature = body.temperature,
            timeout_secs = timeout.as_secs(),
            "Starting streamed generation"
        );

        let builder = self
            .client
            .inner()
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body);

        let response = self
            .client
            .execute_with_retry(builder, timeout, PROVIDER, signal)
            .await?;

        let mut generation = Generation::new(PROVIDER, body.model.clone());
        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();
        let mut done = false;

        while !done {
            let next = tokio::select! {
                biased;
                () = signal.cancelled() => return Err(LlmError::Cancelled),
                next = stream.next() => next,
            };

            let events = match next {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(e)) if e.is_timeout() => {
                    return Err(LlmError::Timeout { duration: timeout });
                }
                Some(Err(e)) => {
                    return Err(LlmError::Transport(format!(
                        "{PROVIDER} stream interrupted: {}",
                        redact_user_string(&e.to_string())
                    )));
                }
                None => {
                    done = true;
                    decoder.finish()
                }
            };

            for event in events {
                match event {
                    SseEvent::Done => done = true,
                    SseEvent::Data(payload) => {
                        apply_chunk(&payload, &mut generation, on_delta)?;
                    }
                }
            }
        }

        debug!(
            provider = PROVIDER,
            text_chars = generation.text.chars().count(),
            reasoning_chars = generation.reasoning.chars().count(),
            tokens_input = ?generation.tokens_input,
            tokens_output = ?generation.tokens_output,
            "Streamed generation completed"
        );

        Ok(generation)
    }
}

fn apply_chunk(
    payload: &str,
    generation: &mut Generation,
    on_delta: &mut (dyn for<'d> FnMut(StreamDelta<'d>) + Send),
) -> Result<(), LlmError> {
    let chunk = parse_chunk(payload)?;

    if let Some(model) = chunk.model {
        generation.model_used = model;
    }
    if let Some(usage) = chunk.usage {
        generation.tokens_input = Some(usage.prompt_tokens);
        generation.tokens_output = Some(usage.completion_tokens);
    }

    for choice in &chunk.choices {
        if let Some(reasoning) = choice.delta.reasoning_text() {
            generation.reasoning.push_str(reasoning);
            on_delta(StreamDelta::Reasoning(reasoning));
        }
        if let Some(text) = choice.delta.content_text() {
            generation.text.push_str(text);
            on_delta(StreamDelta::Text(text));
        }
        if let Some(reason) = &choice.finish_reason {
            generation.finish_reason = Some(reason.clone());
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}
