//! Stream composer - thinking steps, then the model answer, as one paced stream
//!
//! Each request runs as a single pipeline task:
//!
//! 1. analyze the input and release every thinking step;
//! 2. start the gateway stream and release each answer fragment, recording
//!    it as an assistant turn once the client has it.
//!
//! The answer phase starts only after the last thinking envelope is sent.
//! Dropping the [`ChatStream`] aborts the pipeline and the gateway task.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use sessionstore::Role;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::envelope::{Envelope, EnvelopeKind};
use crate::error::ChatError;
use crate::llm::{LlmClient, StreamChunk};
use crate::prompts::PromptLoader;
use crate::state::SessionStore;
use crate::thinking::Thinker;

/// Stream items buffered between the pipeline and the consumer
const OUTPUT_BUFFER: usize = 16;

type Item = Result<Envelope, ChatError>;

/// Fragments marking the edges of model-produced reasoning text
///
/// They frame the answer rather than belong to it, so they are dropped.
pub fn is_delimiter(fragment: &str) -> bool {
    fragment.starts_with("Thinking started") || fragment.contains("Thinking finished")
}

/// Composer settings
#[derive(Debug, Clone)]
pub struct ComposerOptions {
    /// Delay before each envelope is released
    pub pacing: Duration,
    /// Gateway chunks buffered ahead of the composer
    pub chunk_buffer: usize,
    /// Max tokens per completion
    pub max_tokens: u32,
}

/// Builds one [`ChatStream`] per request
#[derive(Clone)]
pub struct StreamComposer {
    store: SessionStore,
    thinker: Thinker,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLoader>,
    options: ComposerOptions,
}

impl StreamComposer {
    pub fn new(
        store: SessionStore,
        thinker: Thinker,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLoader>,
        options: ComposerOptions,
    ) -> Self {
        debug!(?options, "StreamComposer::new: called");
        Self {
            store,
            thinker,
            llm,
            prompts,
            options,
        }
    }

    /// Start the pipeline for `input` in `session_id`
    ///
    /// The user turn must already be in the store.
    pub fn compose(&self, session_id: &str, input: &str) -> ChatStream {
        debug!(%session_id, input_len = input.len(), "compose: called");
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let pipeline = Pipeline {
            composer: self.clone(),
            session_id: session_id.to_string(),
            tx,
        };
        let input = input.to_string();
        let task = tokio::spawn(pipeline.run(input));

        ChatStream {
            session_id: session_id.to_string(),
            rx,
            task,
        }
    }
}

/// Aborts the gateway task when the pipeline stops early
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Pipeline {
    composer: StreamComposer,
    session_id: String,
    tx: mpsc::Sender<Item>,
}

impl Pipeline {
    async fn run(self, input: String) {
        debug!(session_id = %self.session_id, "Pipeline::run: called");
        if let Err(e) = self.drive(&input).await {
            warn!(session_id = %self.session_id, error = %e, "Pipeline::run: chat stream failed");
            let _ = self.tx.send(Err(e)).await;
        }
        debug!(session_id = %self.session_id, "Pipeline::run: finished");
    }

    /// Returns Ok when the stream completed or the client went away
    async fn drive(&self, input: &str) -> Result<(), ChatError> {
        // Thinking phase
        let steps = self.composer.thinker.analyze(&self.session_id, input).await?;
        for step in steps {
            let content = step.content.trim();
            if content.is_empty() {
                continue;
            }
            if !self.release(step.step_type.into(), content).await {
                return Ok(());
            }
        }
        debug!(session_id = %self.session_id, "drive: thinking phase drained");

        // Answer phase; a session cleared meanwhile ends the stream rather than coming back
        let session = self.composer.store.snapshot(&self.session_id).await?;
        let request = self
            .composer
            .prompts
            .build_request(&session, self.composer.options.max_tokens)
            .map_err(|e| ChatError::Internal(e.to_string()))?;

        let (chunk_tx, mut chunk_rx) = mpsc::channel(self.composer.options.chunk_buffer);
        let llm = self.composer.llm.clone();
        let gateway: JoinHandle<_> = tokio::spawn(async move { llm.stream(request, chunk_tx).await });
        let _guard = AbortOnDrop(gateway.abort_handle());

        let mut previous: Option<String> = None;
        let mut released = 0usize;
        loop {
            let chunk = tokio::select! {
                chunk = chunk_rx.recv() => chunk,
                _ = self.tx.closed() => {
                    debug!(session_id = %self.session_id, "drive: client went away during answer");
                    return Ok(());
                }
            };

            match chunk {
                Some(StreamChunk::TextDelta(text)) => {
                    let fragment = text.trim();
                    if fragment.is_empty() {
                        continue;
                    }
                    if previous.as_deref() == Some(fragment) {
                        debug!(session_id = %self.session_id, "drive: collapsing repeated fragment");
                        continue;
                    }
                    previous = Some(fragment.to_string());
                    if is_delimiter(fragment) {
                        debug!(session_id = %self.session_id, "drive: dropping delimiter fragment");
                        continue;
                    }

                    if !self.release(EnvelopeKind::Response, fragment).await {
                        return Ok(());
                    }
                    self.composer
                        .store
                        .append_existing(&self.session_id, Role::Assistant, fragment)
                        .await?;
                    released += 1;
                }
                Some(StreamChunk::Error(message)) => {
                    debug!(session_id = %self.session_id, %message, "drive: gateway reported error");
                }
                Some(StreamChunk::MessageStart { input_tokens }) => {
                    debug!(session_id = %self.session_id, input_tokens, "drive: message started");
                }
                Some(StreamChunk::MessageDone { .. }) => {}
                None => break,
            }
        }

        match gateway.await {
            Ok(Ok(response)) => {
                info!(
                    session_id = %self.session_id,
                    released,
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "Chat stream complete"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(ChatError::Gateway(e)),
            Err(e) => Err(ChatError::Internal(format!("gateway task failed: {}", e))),
        }
    }

    /// Wait the pacing delay, then send one envelope
    ///
    /// Returns false once the client has gone away.
    async fn release(&self, kind: EnvelopeKind, content: &str) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.composer.options.pacing) => {}
            _ = self.tx.closed() => {
                debug!(session_id = %self.session_id, "release: client went away while pacing");
                return false;
            }
        }
        self.tx.send(Ok(Envelope::new(kind, content))).await.is_ok()
    }
}

/// Ordered stream of envelopes for one chat request
///
/// Ends after the last answer fragment, or with a single `Err` item.
/// Dropping it cancels the request.
pub struct ChatStream {
    session_id: String,
    rx: mpsc::Receiver<Item>,
    task: JoinHandle<()>,
}

impl ChatStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Stream for ChatStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            debug!(session_id = %self.session_id, "ChatStream::drop: cancelling pipeline");
            self.task.abort();
        }
    }
}
