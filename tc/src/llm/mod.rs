//! Completion gateway for thinkchat
//!
//! Provides single-shot and streaming text completion behind [`LlmClient`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

mod anthropic;
pub mod client;
mod error;
mod openai;
#[cfg(test)]
mod test_server;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use error::LlmError;
pub use openai::OpenAIClient;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, StreamChunk, TokenUsage};

use crate::config::LlmConfig;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 500 | 502 | 503 | 504 | 529)
}

/// Exponential backoff before retry `attempt` (1-based)
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1).min(6)))
}

/// Wait the provider asks for after a 429, defaulting to a minute
fn retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    let secs = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60);
    Duration::from_secs(secs)
}

/// Send one request and sort the outcome into success or [`LlmError`]
async fn send_once(request: reqwest::RequestBuilder, timeout: Duration) -> Result<reqwest::Response, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::from_transport(e, timeout))?;

    let status = response.status();
    if status.as_u16() == 429 {
        return Err(LlmError::RateLimited {
            retry_after: retry_after(response.headers()),
        });
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(LlmError::ApiError {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

/// Send a request built by `build`, retrying what [`LlmError::is_retryable`] allows
///
/// Returns the first successful response with its body unread.
async fn send_with_retry(
    build: impl Fn() -> reqwest::RequestBuilder,
    timeout: Duration,
    max_retries: u32,
    op: &'static str,
) -> Result<reqwest::Response, LlmError> {
    let mut attempt = 0;
    loop {
        let err = match send_once(build(), timeout).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        if attempt >= max_retries || !err.is_retryable() {
            debug!(op, attempt, error = %err, "send_with_retry: giving up");
            return Err(err);
        }
        attempt += 1;
        let delay = backoff(attempt);
        warn!(op, attempt, error = %err, backoff = ?delay, "send_with_retry: retrying after transient error");
        tokio::time::sleep(delay).await;
    }
}

/// Create an LLM client based on the provider specified in config
///
/// Supports "anthropic" and "openai" providers.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "anthropic" => {
            debug!("create_client: creating Anthropic client");
            Ok(Arc::new(AnthropicClient::from_config(config)?))
        }
        "openai" => {
            debug!("create_client: creating OpenAI client");
            Ok(Arc::new(OpenAIClient::from_config(config)?))
        }
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            Err(LlmError::Config(format!(
                "Unknown LLM provider: '{}'. Supported: anthropic, openai",
                other
            )))
        }
    }
}
