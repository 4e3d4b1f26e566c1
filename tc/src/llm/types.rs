//! LLM request/response types for thinkchat
//!
//! Provider-agnostic: each client converts these to its own wire format.

use serde::{Deserialize, Serialize};
use sessionstore::Turn;
use tracing::debug;

pub use sessionstore::Role;

/// A completion request - everything needed for one LLM call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt (rendered from the Handlebars template)
    pub system_prompt: String,

    /// Conversation so far, oldest first, alternating roles
    pub messages: Vec<Message>,

    /// Max tokens for response (from config)
    pub max_tokens: u32,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        debug!("Message::user: called");
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        debug!("Message::assistant: called");
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }

    /// Convert session turns into an alternating message list
    ///
    /// Streamed answers are stored one fragment per turn, so runs of the same
    /// role are merged into one message. Leading assistant turns (left over
    /// after eviction) are dropped because providers expect the user to speak
    /// first.
    pub fn from_turns<'a>(turns: impl IntoIterator<Item = &'a Turn>) -> Vec<Message> {
        let mut messages: Vec<Message> = Vec::new();
        for turn in turns {
            match messages.last_mut() {
                Some(last) if last.role == turn.role => {
                    last.content.push('\n');
                    last.content.push_str(&turn.content);
                }
                None if turn.role == Role::Assistant => {
                    debug!("Message::from_turns: skipping leading assistant turn");
                }
                _ => messages.push(Message {
                    role: turn.role,
                    content: turn.content.clone(),
                }),
            }
        }
        debug!(message_count = messages.len(), "Message::from_turns: converted");
        messages
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Text content (if any)
    pub content: Option<String>,

    /// Why the model stopped
    pub stop_reason: StopReason,

    /// Token usage
    pub usage: TokenUsage,
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    /// Parse from Anthropic API stop_reason string
    pub fn from_anthropic(s: &str) -> Self {
        debug!(%s, "StopReason::from_anthropic: called");
        match s {
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        }
    }

    /// Parse from OpenAI-compatible finish_reason string
    pub fn from_openai(s: &str) -> Self {
        debug!(%s, "StopReason::from_openai: called");
        match s {
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Streaming chunk sent while a completion is generated
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Message started with input token count
    MessageStart { input_tokens: u64 },

    /// Text being generated
    TextDelta(String),

    /// Message complete with final stats
    MessageDone { stop_reason: StopReason, usage: TokenUsage },

    /// Error during streaming
    Error(String),
}
