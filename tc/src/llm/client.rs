//! LlmClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// Completion gateway - each call is independent
///
/// The client keeps no conversation state: the caller sends the full
/// (bounded) history with every request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request (blocking until complete)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion
    ///
    /// Sends `TextDelta` chunks to the provided channel as they arrive and
    /// returns the final complete response. A closed channel is not an error;
    /// the caller has simply stopped listening.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;
}
