//! Shared HTTP client infrastructure for HTTP-based LLM providers
//!
//! One `reqwest::Client` is configured per backend and reused across
//! generations, with a timeout cap and a retry policy for 5xx and network
//! failures.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use stepwise_utils::redaction::redact_user_string;
use stepwise_utils::{CancellationSignal, LlmError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retry attempts for 5xx and network failures
const MAX_RETRIES: u32 = 2;

/// Backoff before the first retry; doubles after that
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: Arc<Client>,
    max_timeout: Duration,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the client cannot be constructed
    pub fn with_max_timeout(max_timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            max_timeout,
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute `request_builder` with timeout, retry and cancellation.
    ///
    /// - Per-request timeout: `min(request_timeout, max_timeout)`
    /// - Up to 2 retries for 5xx and network failures, backing off 1s then 2s
    /// - No retries for 4xx errors or timeouts
    ///
    /// # Errors
    ///
    /// - `LlmError::ProviderAuth` for 401/403
    /// - `LlmError::ProviderQuota` for 429
    /// - `LlmError::ProviderOutage` for 5xx after retries
    /// - `LlmError::Timeout` when the deadline elapses
    /// - `LlmError::Transport` for network errors after retries
    /// - `LlmError::Cancelled` when `signal` fires
    pub async fn execute_with_retry(
        &self,
        request_builder: RequestBuilder,
        request_timeout: Duration,
        provider_name: &str,
        signal: &CancellationSignal,
    ) -> Result<Response, LlmError> {
        let effective_timeout = request_timeout.min(self.max_timeout);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let request = request_builder
                .try_clone()
                .ok_or_else(|| LlmError::Transport("Failed to clone request for retry".to_string()))?
                .timeout(effective_timeout)
                .build()
                .map_err(|e| LlmError::Transport(format!("Failed to build request: {e}")))?;

            debug!(
                provider = provider_name,
                attempt = attempt,
                timeout_secs = effective_timeout.as_secs(),
                "Executing HTTP request"
            );

            let outcome = tokio::select! {
                biased;
                () = signal.cancelled() => return Err(LlmError::Cancelled),
                outcome = self.client.execute(request) => outcome,
            };

            let retry_reason = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_client_error() {
                        return Err(map_client_error(status, provider_name));
                    }
                    if !status.is_server_error() {
                        return Ok(response);
                    }
                    if attempt > MAX_RETRIES {
                        return Err(LlmError::ProviderOutage(format!(
                            "{provider_name} returned server error: {status}"
                        )));
                    }
                    warn!(
                        provider = provider_name,
                        attempt = attempt,
                        status = status.as_u16(),
                        "Server error, will retry"
                    );
                    status.to_string()
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(LlmError::Timeout {
                            duration: effective_timeout,
                        });
                    }
                    let message = redact_user_string(&e.to_string());
                    if attempt > MAX_RETRIES {
                        return Err(LlmError::Transport(format!(
                            "{provider_name} request failed: {message}"
                        )));
                    }
                    warn!(
                        provider = provider_name,
                        attempt = attempt,
                        error = %message,
                        "Network error, will retry"
                    );
                    message
                }
            };

            let backoff = backoff_for_attempt(attempt);
            debug!(provider = provider_name, reason = %retry_reason, backoff_ms = backoff.as_millis() as u64, "Backing off");
            tokio::select! {
                biased;
                () = signal.cancelled() => return Err(LlmError::Cancelled),
                () = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    INITIAL_BACKOFF * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Map HTTP 4xx status codes to `LlmError` variants
///
/// - 401/403 → `ProviderAuth`
/// - 429 → `ProviderQuota`
/// - other 4xx → `Transport`
pub(crate) fn map_client_error(status: StatusCode, provider_name: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::ProviderAuth(format!("{provider_name} authentication failed: {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            LlmError::ProviderQuota(format!("{provider_name} rate limit exceeded: {status}"))
        }
        _ => LlmError::Transport(format!("{provider_name} returned client error: {status}")),
    }
}
