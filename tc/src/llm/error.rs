//! Completion gateway errors

use std::time::Duration;
use thiserror::Error;

use super::is_retryable_status;

/// Ways a completion call can fail
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider answered 429
    #[error("Provider is rate limiting, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Non-success HTTP status
    #[error("Provider returned HTTP {status}: {message}")]
    ApiError { status: u16, message: String },

    /// Connection could not be made or broke
    #[error("Provider unreachable: {0}")]
    Network(reqwest::Error),

    /// No answer within the configured request timeout
    #[error("Provider did not answer within {0:?}")]
    Timeout(Duration),

    /// The provider reported a failure inside an accepted stream
    #[error("Provider failed mid-stream: {0}")]
    StreamFailed(String),

    /// The stream closed before the provider's end marker
    #[error("Answer stream ended before the provider finished")]
    Truncated,

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    /// Provider or credentials are not usable
    #[error("Gateway misconfigured: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Classify a reqwest failure, given the client's request timeout
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(timeout)
        } else {
            LlmError::Network(err)
        }
    }

    /// Whether reconnecting after a backoff may succeed
    ///
    /// Rate limits are not: the provider asks for a wait far longer than the
    /// backoff, so the caller gets the error with its `retry_after`.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::ApiError { status, .. } => is_retryable_status(*status),
            LlmError::Network(_) | LlmError::Timeout(_) => true,
            LlmError::RateLimited { .. }
            | LlmError::StreamFailed(_)
            | LlmError::Truncated
            | LlmError::InvalidResponse(_)
            | LlmError::Config(_)
            | LlmError::Json(_) => false,
        }
    }
}
