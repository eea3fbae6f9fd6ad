//! Deterministic backend for dry runs and tests.
//!
//! Streams canned reasoning and text in fixed-size deltas, honours
//! cancellation between deltas, and can fail partway through.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use stepwise_utils::{CancellationSignal, LlmError};

use crate::types::{Generation, GenerationRequest, LlmBackend, Role, StreamDelta};

const PROVIDER: &str = "scripted";
const DEFAULT_DELTA_CHARS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
enum Script {
    Fixed { reasoning: String, text: String },
    /// Derive output from the request, for `--dry-run`
    Echo,
}

#[derive(Debug, Clone, PartialEq)]
struct Failure {
    after_deltas: usize,
    error: LlmError,
}

#[derive(Debug)]
pub struct ScriptedBackend {
    script: Script,
    delta_chars: usize,
    delay: Option<Duration>,
    failure: Option<Failure>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    /// Always answer with `text` and no reasoning.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_script(Script::Fixed {
            reasoning: String::new(),
            text: text.into(),
        })
    }

    /// Summarise the request instead of answering it.
    #[must_use]
    pub fn dry_run() -> Self {
        Self::with_script(Script::Echo)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            delta_chars: DEFAULT_DELTA_CHARS,
            delay: None,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        if let Script::Fixed { reasoning: r, .. } = &mut self.script {
            *r = reasoning.into();
        }
        self
    }

    /// Characters per streamed delta (at least 1).
    #[must_use]
    pub fn with_delta_chars(mut self, chars: usize) -> Self {
        self.delta_chars = chars.max(1);
        self
    }

    /// Pause between deltas, e.g. to exercise cancellation.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail with `error` once `after_deltas` deltas have been delivered.
    #[must_use]
    pub fn with_failure_after(mut self, after_deltas: usize, error: LlmError) -> Self {
        self.failure = Some(Failure {
            after_deltas,
            error,
        });
        self
    }

    #[must_use]
    pub fn with_failure(self, error: LlmError) -> Self {
        self.with_failure_after(0, error)
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn render(&self, request: &GenerationRequest) -> (String, String) {
        match &self.script {
            Script::Fixed { reasoning, text } => (reasoning.clone(), text.clone()),
            Script::Echo => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map_or("", |m| m.content.as_str());
                let prompt_chars = request.system.as_deref().map_or(0, |s| s.chars().count());
                let reasoning = format!(
                    "Dry run: received a {prompt_chars}-character prompt and {} message(s).\n\n\
                     No model was contacted.\n\n",
                    request.messages.len()
                );
                let text = format!(
                    "[dry run] {} would answer: {}",
                    if request.model.is_empty() { "model" } else { request.model.as_str() },
                    first_line(last_user)
                );
                (reasoning, text)
            }
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

fn split_chars(s: &str, chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in s.char_indices().enumerate() {
        if count > 0 && count % chars == 0 {
            pieces.push(&s[start..idx]);
            start = idx;
        }
    }
    if start < s.len() {
        pieces.push(&s[start..]);
    }
    pieces
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        signal: &CancellationSignal,
        on_delta: &mut (dyn for<'d> FnMut(StreamDelta<'d>) + Send),
    ) -> Result<Generation, LlmError> {
        let (reasoning, text) = self.render(&request);
        let model = if request.model.is_empty() {
            PROVIDER.to_string()
        } else {
            request.model.clone()
        };
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let mut generation = Generation::new(PROVIDER, model);
        let deltas = split_chars(&reasoning, self.delta_chars)
            .into_iter()
            .map(StreamDelta::Reasoning)
            .chain(
                split_chars(&text, self.delta_chars)
                    .into_iter()
                    .map(StreamDelta::Text),
            );

        for (sent, delta) in deltas.enumerate() {
            if let Some(failure) = &self.failure
                && sent == failure.after_deltas
            {
                return Err(failure.error.clone());
            }
            if let Some(delay) = self.delay {
                tokio::select! {
                    biased;
                    () = signal.cancelled() => return Err(LlmError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            if signal.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            match delta {
                StreamDelta::Reasoning(s) => generation.reasoning.push_str(s),
                StreamDelta::Text(s) => generation.text.push_str(s),
            }
            on_delta(delta);
        }

        if let Some(failure) = &self.failure
            && failure.after_deltas
                >= split_chars(&reasoning, self.delta_chars).len()
                    + split_chars(&text, self.delta_chars).len()
        {
            return Err(failure.error.clone());
        }

        generation.finish_reason = Some("stop".to_string());
        Ok(generation)
    }
}
