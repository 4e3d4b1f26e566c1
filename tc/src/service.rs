//! Chat service - the entry point shared by the transport and the CLI

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sessionstore::{Role, Turn};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::compose::{ChatStream, ComposerOptions, StreamComposer};
use crate::config::Config;
use crate::error::ChatError;
use crate::llm::{LlmClient, LlmError};
use crate::prompts::PromptLoader;
use crate::state::{SessionStore, StoreStats};
use crate::thinking::Thinker;

/// A user message, optionally bound to an existing session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub content: String,
}

impl ChatRequest {
    pub fn new(session_id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            session_id,
            content: content.into(),
        }
    }
}

/// Single-shot answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub session_id: String,
    pub content: String,
}

/// Owns the session store and runs chat requests against it
#[derive(Clone)]
pub struct ChatService {
    store: SessionStore,
    thinker: Thinker,
    composer: StreamComposer,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLoader>,
    max_input_chars: usize,
    max_tokens: u32,
}

impl ChatService {
    /// Build the service from config around an LLM client
    pub fn new(config: &Config, llm: Arc<dyn LlmClient>) -> eyre::Result<Self> {
        debug!("ChatService::new: called");
        config.validate()?;

        let store = SessionStore::new(config.session.history_bound)?;
        let thinker = Thinker::new(store.clone());
        let prompts = Arc::new(PromptLoader::new(&config.prompt.system)?);
        let composer = StreamComposer::new(
            store.clone(),
            thinker.clone(),
            llm.clone(),
            prompts.clone(),
            ComposerOptions {
                pacing: config.stream.pacing(),
                chunk_buffer: config.stream.chunk_buffer,
                max_tokens: config.llm.max_tokens,
            },
        );

        Ok(Self {
            store,
            thinker,
            composer,
            llm,
            prompts,
            max_input_chars: config.session.max_input_chars,
            max_tokens: config.llm.max_tokens,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn thinker(&self) -> &Thinker {
        &self.thinker
    }

    /// Check the request and resolve its session id
    fn validate(&self, request: &ChatRequest) -> Result<String, ChatError> {
        if request.content.trim().is_empty() {
            return Err(ChatError::Validation("message content must not be blank".to_string()));
        }
        let chars = request.content.chars().count();
        if chars > self.max_input_chars {
            return Err(ChatError::Validation(format!(
                "message content is {} characters, limit is {}",
                chars, self.max_input_chars
            )));
        }
        match &request.session_id {
            Some(id) if id.trim().is_empty() => Err(ChatError::Validation("session id must not be blank".to_string())),
            Some(id) => Ok(id.clone()),
            None => {
                let id = Uuid::now_v7().to_string();
                debug!(session_id = %id, "validate: generated session id");
                Ok(id)
            }
        }
    }

    /// Record the user turn and start the thinking-then-answer stream
    ///
    /// Validation errors are returned here, before any envelope exists.
    pub async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ChatError> {
        debug!(session_id = ?request.session_id, content_len = request.content.len(), "stream_chat: called");
        let session_id = self.validate(&request)?;

        self.store
            .append_turn(&session_id, Role::User, request.content.as_str())
            .await?;
        info!(%session_id, "Chat stream started");

        Ok(self.composer.compose(&session_id, &request.content))
    }

    /// Answer in one piece without thinking steps
    pub async fn send(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        debug!(session_id = ?request.session_id, content_len = request.content.len(), "send: called");
        let session_id = self.validate(&request)?;

        self.store
            .append_turn(&session_id, Role::User, request.content.as_str())
            .await?;
        let session = self.store.snapshot(&session_id).await?;
        let completion = self
            .prompts
            .build_request(&session, self.max_tokens)
            .map_err(|e| ChatError::Internal(e.to_string()))?;

        let response = self.llm.complete(completion).await?;
        let content = response.content.as_deref().map(str::trim).unwrap_or_default().to_string();
        if content.is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".to_string()).into());
        }

        self.store
            .append_existing(&session_id, Role::Assistant, content.as_str())
            .await?;
        info!(%session_id, output_tokens = response.usage.output_tokens, "Chat reply sent");

        Ok(ChatReply { session_id, content })
    }

    pub async fn summary(&self, session_id: &str) -> Result<String, ChatError> {
        debug!(%session_id, "summary: called");
        Ok(self.store.summary(session_id).await?)
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, ChatError> {
        debug!(%session_id, "history: called");
        Ok(self.store.history(session_id).await?)
    }

    /// Forget a session and its cached analysis
    pub async fn clear(&self, session_id: &str) -> Result<bool, ChatError> {
        debug!(%session_id, "clear: called");
        self.thinker.clear_context(session_id).await;
        Ok(self.store.clear(session_id).await?)
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }

    /// Start idle-session expiry if the config enables it
    pub fn spawn_reaper(&self, config: &Config) -> Option<JoinHandle<()>> {
        let ttl = config.session.idle_ttl()?;
        info!(ttl_secs = ttl.as_secs(), "Idle session reaper started");
        Some(self.store.spawn_reaper(config.session.reap_interval(), ttl))
    }

    pub async fn shutdown(&self) {
        debug!("shutdown: called");
        self.store.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::EnvelopeKind;
    use crate::llm::client::mock::MockLlmClient;
    use crate::state::StateError;
    use futures::StreamExt;

    fn config() -> Config {
        let mut config = Config::default();
        config.stream.pacing_ms = 1;
        config
    }

    fn service(llm: MockLlmClient) -> (ChatService, Arc<MockLlmClient>) {
        let llm = Arc::new(llm);
        (ChatService::new(&config(), llm.clone()).unwrap(), llm)
    }

    #[tokio::test]
    async fn test_stream_chat_generates_session_id() {
        let (service, _) = service(MockLlmClient::new(["Hi"]));
        let stream = service.stream_chat(ChatRequest::new(None, "hello")).await.unwrap();

        let session_id = stream.session_id().to_string();
        assert!(Uuid::parse_str(&session_id).is_ok());

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 6);
        let last = items.last().unwrap().as_ref().unwrap();
        assert_eq!(last.kind, EnvelopeKind::Response);
        assert_eq!(last.content, "Hi");

        assert_eq!(service.history(&session_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_chat_validation() {
        let (service, llm) = service(MockLlmClient::new(["unused"]));

        let blank = service.stream_chat(ChatRequest::new(None, "  ")).await;
        assert!(matches!(blank, Err(ChatError::Validation(_))));

        let blank_id = service.stream_chat(ChatRequest::new(Some(" ".to_string()), "hi")).await;
        assert!(matches!(blank_id, Err(ChatError::Validation(_))));

        let too_long = service.stream_chat(ChatRequest::new(None, "x".repeat(2001))).await;
        assert!(matches!(too_long, Err(ChatError::Validation(_))));

        assert_eq!(service.stats().await.sessions_created, 0);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_length_limit_counts_chars() {
        let (service, _) = service(MockLlmClient::new(["ok"]));
        // 2000 CJK characters are 6000 bytes but within the limit
        let request = ChatRequest::new(Some("s1".to_string()), "字".repeat(2000));
        assert!(service.send(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_records_both_turns() {
        let (service, llm) = service(MockLlmClient::new(["  Hello ", "Alice  "]));
        let reply = service
            .send(ChatRequest::new(Some("s1".to_string()), "I am Alice"))
            .await
            .unwrap();

        assert_eq!(reply.session_id, "s1");
        assert_eq!(reply.content, "Hello Alice");
        assert_eq!(llm.call_count(), 1);

        let history = service.history("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(service.summary("s1").await.unwrap(), "user identity: Alice");
    }

    #[tokio::test]
    async fn test_send_gateway_failure() {
        let (service, _) = service(MockLlmClient::failing_after(["x"], 0));
        let result = service.send(ChatRequest::new(Some("s1".to_string()), "hello")).await;

        assert!(matches!(result, Err(ChatError::Gateway(_))));
        // The user turn stays recorded
        assert_eq!(service.history("s1").await.unwrap().len(), 1);
    }

    /// Gateway that clears the session while its completion is in flight
    #[derive(Default)]
    struct ClearingGateway {
        store: std::sync::OnceLock<SessionStore>,
    }

    #[async_trait::async_trait]
    impl LlmClient for ClearingGateway {
        async fn complete(
            &self,
            _request: crate::llm::CompletionRequest,
        ) -> Result<crate::llm::CompletionResponse, LlmError> {
            if let Some(store) = self.store.get() {
                store.clear("s1").await.unwrap();
            }
            Ok(crate::llm::CompletionResponse {
                content: Some("late answer".to_string()),
                stop_reason: crate::llm::StopReason::EndTurn,
                usage: crate::llm::TokenUsage::default(),
            })
        }

        async fn stream(
            &self,
            request: crate::llm::CompletionRequest,
            _chunk_tx: tokio::sync::mpsc::Sender<crate::llm::StreamChunk>,
        ) -> Result<crate::llm::CompletionResponse, LlmError> {
            self.complete(request).await
        }
    }

    #[tokio::test]
    async fn test_send_does_not_recreate_cleared_session() {
        let gateway = Arc::new(ClearingGateway::default());
        let service = ChatService::new(&config(), gateway.clone()).unwrap();
        let _ = gateway.store.set(service.store().clone());

        let result = service.send(ChatRequest::new(Some("s1".to_string()), "hello")).await;

        assert!(matches!(result, Err(ChatError::State(StateError::SessionGone(_)))));
        assert_eq!(service.stats().await.live_sessions, 0);
        assert_eq!(service.stats().await.sessions_created, 1);
    }

    #[tokio::test]
    async fn test_clear_drops_session_and_context() {
        let (service, _) = service(MockLlmClient::new(["ok"]));
        let stream = service
            .stream_chat(ChatRequest::new(Some("s1".to_string()), "weather today"))
            .await
            .unwrap();
        let _: Vec<_> = stream.collect().await;
        assert!(service.thinker().find_context("s1").await.is_some());

        assert!(service.clear("s1").await.unwrap());
        assert!(service.thinker().find_context("s1").await.is_none());
        assert!(service.history("s1").await.unwrap().is_empty());
        assert_eq!(service.summary("s1").await.unwrap(), sessionstore::NO_SUMMARY_YET);
    }

    #[tokio::test]
    async fn test_reaper_disabled_with_zero_ttl() {
        let (service, _) = service(MockLlmClient::new(["ok"]));
        let mut config = config();
        config.session.idle_ttl_secs = 0;
        assert!(service.spawn_reaper(&config).is_none());

        config.session.idle_ttl_secs = 60;
        let reaper = service.spawn_reaper(&config).unwrap();
        reaper.abort();
    }
}
