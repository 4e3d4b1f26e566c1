//! thinkchat - conversational backend with visible thinking steps
//!
//! Each user message is answered in two phases: a fixed sequence of
//! rule-based thinking steps (history, keywords, domain, question type,
//! context analysis), then the model's answer streamed fragment by fragment.
//! Both phases go out as one paced stream of envelopes.
//!
//! # Modules
//!
//! - [`state`] - per-session actors and the session store
//! - [`thinking`] - keyword, domain and question-type analysis
//! - [`llm`] - completion gateway trait with Anthropic and OpenAI clients
//! - [`compose`] - merges thinking steps and answer fragments into envelopes
//! - [`service`] - request validation and the operations the transport exposes
//! - [`transport`] - NDJSON over TCP, server and client
//! - [`config`] - configuration types and loading

pub mod cli;
pub mod compose;
pub mod config;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod service;
pub mod state;
pub mod thinking;
pub mod transport;

// Re-export commonly used types
pub use compose::{ChatStream, ComposerOptions, Envelope, EnvelopeKind, StreamComposer};
pub use config::{Config, LlmConfig};
pub use error::ChatError;
pub use llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError, OpenAIClient, StreamChunk,
    create_client,
};
pub use prompts::{PromptContext, PromptLoader};
pub use service::{ChatReply, ChatRequest, ChatService};
pub use state::{SessionHandle, SessionStore, StateCommand, StateError, StateResponse, StoreStats};
pub use thinking::{StepType, Thinker, ThinkingContext, ThinkingError, ThinkingStep};
pub use transport::{ChatClient, Frame, Request};
