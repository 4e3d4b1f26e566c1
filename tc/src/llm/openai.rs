//! OpenAI-compatible API client implementation
//!
//! Implements the LlmClient trait for the Chat Completions API. Any
//! compatible endpoint works by pointing `base-url` at it, e.g. DashScope's
//! `https://dashscope.aliyuncs.com/compatible-mode` for Qwen models.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::send_with_retry;
use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, StopReason, StreamChunk, TokenUsage};
use crate::config::LlmConfig;

/// OpenAI-compatible API client
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    timeout: Duration,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAIClient {
    /// Create a new client from configuration
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, base_url = %config.base_url, "OpenAIClient::from_config: called");
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
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Build the request body for the Chat Completions API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(convert_messages(&request.messages));

        let max_tokens = request.max_tokens.min(self.max_tokens);

        // GPT-5.x and o1/o3 models use max_completion_tokens instead of max_tokens
        let uses_completion_tokens =
            self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("o3");

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        if uses_completion_tokens {
            body["max_completion_tokens"] = serde_json::json!(max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(self.url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(body)
    }

    async fn send(&self, body: &serde_json::Value, op: &'static str) -> Result<reqwest::Response, LlmError> {
        send_with_retry(|| self.post(body), self.timeout, self.max_retries, op).await
    }

    /// Parse the Chat Completions response
    fn parse_response(&self, api_response: OpenAIResponse) -> CompletionResponse {
        debug!(choice_count = api_response.choices.len(), "parse_response: called");
        let (content, stop_reason) = match api_response.choices.into_iter().next() {
            Some(c) => (
                c.message.content.filter(|s| !s.is_empty()),
                c.finish_reason
                    .as_deref()
                    .map(StopReason::from_openai)
                    .unwrap_or(StopReason::EndTurn),
            ),
            None => (None, StopReason::EndTurn),
        };

        let usage = api_response.usage.unwrap_or_default();
        CompletionResponse {
            content,
            stop_reason,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        }
    }
}

/// Convert internal Message types to Chat Completions format
fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    debug!(message_count = %messages.len(), "convert_messages: called");
    messages
        .iter()
        .map(|msg| {
            serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            })
        })
        .collect()
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "complete: called");
        let body = self.build_request_body(&request);

        let response = self.send(&body, "complete").await?;
        debug!("complete: success");
        let api_response: OpenAIResponse = response
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
        body["stream_options"] = serde_json::json!({ "include_usage": true });

        let response = self.send(&body, "stream").await?;

        let mut body_stream = response.bytes_stream();
        let mut lines = SseLines::default();
        let mut full_content = String::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = TokenUsage::default();
        let mut finished = false;
        let mut open = true;

        'read: while open {
            match body_stream.next().await {
                Some(Ok(bytes)) => lines.push(&bytes),
                Some(Err(e)) => {
                    debug!(error = %e, "stream: body error");
                    return Err(report(&chunk_tx, LlmError::from_transport(e, self.timeout)).await);
                }
                None => {
                    lines.finish();
                    open = false;
                }
            }

            while let Some(line) = lines.next_line() {
                let event = match line.and_then(|line| parse_sse_line(&line)) {
                    Ok(Some(event)) => event,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(error = %e, "stream: provider failure");
                        return Err(report(&chunk_tx, e).await);
                    }
                };
                let chunk_data = match event {
                    SseEvent::Done => {
                        debug!("stream: [DONE]");
                        finished = true;
                        break 'read;
                    }
                    SseEvent::Chunk(chunk_data) => chunk_data,
                };

                if let Some(choice) = chunk_data.choices.first() {
                    if let Some(content) = &choice.delta.content
                        && !content.is_empty()
                    {
                        full_content.push_str(content);
                        if chunk_tx.send(StreamChunk::TextDelta(content.clone())).await.is_err() {
                            debug!("stream: receiver dropped, closing");
                            finished = true;
                            break 'read;
                        }
                    }

                    if let Some(reason) = &choice.finish_reason {
                        stop_reason = StopReason::from_openai(reason);
                    }
                }

                // Usage arrives in the final chunk when include_usage is set
                if let Some(u) = chunk_data.usage {
                    usage.input_tokens = u.prompt_tokens;
                    usage.output_tokens = u.completion_tokens;
                }
            }
        }

        if !finished {
            debug!(received = full_content.len(), "stream: body ended without [DONE]");
            return Err(report(&chunk_tx, LlmError::Truncated).await);
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

/// Tell the receiver about a failure, then hand the error back
async fn report(chunk_tx: &mpsc::Sender<StreamChunk>, err: LlmError) -> LlmError {
    let _ = chunk_tx.send(StreamChunk::Error(err.to_string())).await;
    err
}

/// Reassembles SSE lines from body chunks
///
/// Bytes are held until their line is complete, so a multi-byte character
/// split across chunks decodes intact.
#[derive(Debug, Default)]
struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Terminate a trailing line the body left open
    fn finish(&mut self) {
        if !self.pending.is_empty() {
            self.pending.push(b'\n');
        }
    }

    /// Next complete line, trimmed
    fn next_line(&mut self) -> Option<Result<String, LlmError>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(
            String::from_utf8(line)
                .map(|line| line.trim().to_string())
                .map_err(|e| LlmError::InvalidResponse(format!("stream line is not UTF-8: {}", e))),
        )
    }
}

#[derive(Debug)]
enum SseEvent {
    Chunk(OpenAIStreamChunk),
    Done,
}

/// Interpret one SSE line
///
/// Comments, blank lines and non-data fields give `None`. An `error` object
/// in the payload fails the stream.
fn parse_sse_line(line: &str) -> Result<Option<SseEvent>, LlmError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: OpenAIStreamChunk = serde_json::from_str(data)?;
    if let Some(error) = &chunk.error {
        let message = match error {
            serde_json::Value::String(message) => message.clone(),
            other => other["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        };
        return Err(LlmError::StreamFailed(message));
    }
    Ok(Some(SseEvent::Chunk(chunk)))
}

// Chat Completions response types

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}
