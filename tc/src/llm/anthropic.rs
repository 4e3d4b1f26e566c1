//! Anthropic Claude API client implementation
//!
//! Implements the LlmClient trait for Anthropic's Messages API with
//! support for both blocking and streaming responses.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, StopReason, StreamChunk, TokenUsage};
use super::{backoff, retry_after, send_with_retry};
use crate::config::LlmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    timeout: Duration,
    max_tokens: u32,
    max_retries: u32,
}

impl AnthropicClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, base_url = %config.base_url, "AnthropicClient::from_config: called");
        let api_key = config.get_api_key().map_err(|e| LlmError::Config(e.to_string()))?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            timeout,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Build the request body for the Anthropic API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "system": request.system_prompt,
            "messages": convert_messages(&request.messages),
        })
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(self.url())
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }

    /// Parse the Anthropic API response
    fn parse_response(&self, api_response: AnthropicResponse) -> CompletionResponse {
        debug!(?api_response.stop_reason, "parse_response: called");
        let content: String = api_response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect();

        CompletionResponse {
            content: if content.is_empty() { None } else { Some(content) },
            stop_reason: StopReason::from_anthropic(&api_response.stop_reason),
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
        }
    }
}

/// Convert internal Message types to Anthropic API format
fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    debug!(message_count = %messages.len(), "convert_messages: called");
    messages
        .iter()
        .map(|msg| {
            serde_json::json!({
                "role": msg.role,
                "content": msg.content,
            })
        })
        .collect()
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "complete: called");
        let body = self.build_request_body(&request);

        let response = send_with_retry(|| self.post(&body), self.timeout, self.max_retries, "complete").await?;
        debug!("complete: success");
        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_transport(e, self.timeout))?;
        Ok(self.parse_response(api_response))
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "stream: called");
        let mut body = self.build_request_body(&request);
        body["stream"] = serde_json::json!(true);

        let mut full_content = String::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = TokenUsage::default();
        let mut attempt = 0;

        'connect: loop {
            let mut es = EventSource::new(self.post(&body)).map_err(|e| LlmError::Config(e.to_string()))?;

            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {
                        debug!("stream: Event::Open");
                    }
                    Ok(Event::Message(msg)) => {
                        let data: serde_json::Value = serde_json::from_str(&msg.data).map_err(LlmError::Json)?;

                        match data["type"].as_str() {
                            Some("message_start") => {
                                debug!("stream: message_start");
                                if let Some(u) = data["message"].get("usage") {
                                    usage.input_tokens = u["input_tokens"].as_u64().unwrap_or(0);
                                    let _ = chunk_tx
                                        .send(StreamChunk::MessageStart {
                                            input_tokens: usage.input_tokens,
                                        })
                                        .await;
                                }
                            }
                            Some("content_block_delta") => {
                                if let Some(text) = data["delta"]["text"].as_str() {
                                    debug!("stream: content_block_delta text");
                                    full_content.push_str(text);
                                    if chunk_tx.send(StreamChunk::TextDelta(text.to_string())).await.is_err() {
                                        debug!("stream: receiver dropped, closing");
                                        es.close();
                                        break 'connect;
                                    }
                                }
                            }
                            Some("message_delta") => {
                                debug!("stream: message_delta");
                                if let Some(sr) = data["delta"]["stop_reason"].as_str() {
                                    stop_reason = StopReason::from_anthropic(sr);
                                }
                                if let Some(u) = data.get("usage") {
                                    usage.output_tokens = u["output_tokens"].as_u64().unwrap_or(0);
                                }
                            }
                            Some("message_stop") => {
                                debug!("stream: message_stop");
                                es.close();
                                break 'connect;
                            }
                            Some("error") => {
                                let message = data["error"]["message"].as_str().unwrap_or("unknown error").to_string();
                                debug!(%message, "stream: error event");
                                es.close();
                                let _ = chunk_tx.send(StreamChunk::Error(message.clone())).await;
                                return Err(LlmError::StreamFailed(message));
                            }
                            _ => {
                                debug!("stream: ignored event type");
                            }
                        }
                    }
                    Err(e) => {
                        es.close();
                        let err = classify_stream_error(e, self.timeout).await;
                        // Only a connection that never produced text may be retried
                        if full_content.is_empty() && attempt < self.max_retries && err.is_retryable() {
                            attempt += 1;
                            let delay = backoff(attempt);
                            warn!(attempt, error = %err, backoff = ?delay, "stream: retrying connection after error");
                            tokio::time::sleep(delay).await;
                            continue 'connect;
                        }
                        debug!(error = %err, "stream: giving up");
                        let _ = chunk_tx.send(StreamChunk::Error(err.to_string())).await;
                        return Err(err);
                    }
                }
            }
            break;
        }

        debug!("stream: complete");
        let _ = chunk_tx
            .send(StreamChunk::MessageDone {
                stop_reason: stop_reason.clone(),
                usage: usage.clone(),
            })
            .await;

        Ok(CompletionResponse {
            content: if full_content.is_empty() { None } else { Some(full_content) },
            stop_reason,
            usage,
        })
    }
}

/// Map an event-source failure onto [`LlmError`]
async fn classify_stream_error(err: reqwest_eventsource::Error, timeout: Duration) -> LlmError {
    use reqwest_eventsource::Error;

    match err {
        Error::Transport(e) => LlmError::from_transport(e, timeout),
        Error::InvalidStatusCode(status, response) if status.as_u16() == 429 => LlmError::RateLimited {
            retry_after: retry_after(response.headers()),
        },
        Error::InvalidStatusCode(status, response) => LlmError::ApiError {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        },
        Error::StreamEnded => LlmError::Truncated,
        other => LlmError::InvalidResponse(other.to_string()),
    }
}

// Anthropic API response types

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: String,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AnthropicClient {
        AnthropicClient {
            model: "claude-sonnet-4".to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            http: Client::new(),
            timeout: Duration::from_secs(5),
            max_tokens: 2048,
            max_retries: 0,
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let request = CompletionRequest {
            system_prompt: "You are helpful".to_string(),
            messages: vec![Message::user("Hello"), Message::assistant("Hi"), Message::user("How are you?")],
            max_tokens: 1000,
        };

        let body = client().build_request_body(&request);

        assert_eq!(body["model"], "claude-sonnet-4");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["system"], "You are helpful");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["messages"][2]["content"], "How are you?");
    }

    #[test]
    fn test_max_tokens_capped() {
        let request = CompletionRequest {
            system_prompt: String::new(),
            messages: vec![Message::user("Hello")],
            max_tokens: 100_000,
        };

        let body = client().build_request_body(&request);
        assert_eq!(body["max_tokens"], 2048);
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let api_response: AnthropicResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "Hello "},
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "there"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 3}
        }))
        .unwrap();

        let response = client().parse_response(api_response);
        assert_eq!(response.content, Some("Hello there".to_string()));
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 3);
    }

    #[tokio::test]
    async fn test_stream_does_not_retry_rejected_credentials() {
        use std::sync::atomic::Ordering;

        let (base_url, hits) = crate::llm::test_server::status(
            "401 Unauthorized",
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
        )
        .await;

        let client = AnthropicClient {
            base_url,
            max_retries: 3,
            ..client()
        };
        let request = CompletionRequest {
            system_prompt: String::new(),
            messages: vec![Message::user("Hello")],
            max_tokens: 100,
        };
        let (tx, mut rx) = mpsc::channel(16);

        let err = client.stream(request, tx).await.unwrap_err();
        assert!(matches!(err, LlmError::ApiError { status: 401, ref message } if message.contains("invalid x-api-key")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(matches!(rx.recv().await, Some(StreamChunk::Error(_))));
    }
}
