//! Chat error types

use thiserror::Error;

use crate::llm::LlmError;
use crate::state::StateError;
use crate::thinking::ThinkingError;

/// Errors surfaced to chat callers
#[derive(Debug, Error)]
pub enum ChatError {
    /// Bad request; never retried
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Session store error: {0}")]
    State(StateError),

    /// Completion gateway failed; ends the stream
    #[error("Completion failed: {0}")]
    Gateway(#[from] LlmError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::Validation(_))
    }
}

impl From<StateError> for ChatError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Validation(msg) => ChatError::Validation(msg),
            StateError::Session(e) => ChatError::Validation(e.to_string()),
            other => ChatError::State(other),
        }
    }
}

impl From<ThinkingError> for ChatError {
    fn from(err: ThinkingError) -> Self {
        match err {
            ThinkingError::Validation(msg) => ChatError::Validation(msg),
            ThinkingError::State(e) => e.into(),
        }
    }
}
