//! Streaming client for OpenAI-compatible Chat Completions APIs.
//!
//! Works against OpenAI itself and compatible endpoints (DeepSeek, Ollama,
//! vLLM, ...).  Only streaming mode is used: every delta is handed to a
//! caller-supplied async callback so the engine can forward tokens while the
//! generation is still running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::streaming_openai::OpenAiStreamAccumulator;
use crate::llm::types::{AssistantMessage, ChatRequest, Message, Role, StreamDelta, ToolDefinition};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "deepseek-chat";

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    /// Default model identifier.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
    /// Whole-request timeout, including the streamed body.
    pub request_timeout: Duration,
}

impl LlmClientConfig {
    /// Create a configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::openai_compatible(api_key, model, OPENAI_BASE_URL)
    }

    /// Create a configuration for any OpenAI-compatible API.
    pub fn openai_compatible(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: model.into(),
            max_tokens: 4096,
            request_timeout: Duration::from_secs(120),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Streaming Chat Completions client.  Cheaply cloneable.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: "openai".into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// The model used when a request does not name one.
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Send a chat request in streaming mode, awaiting `on_delta` for each
    /// text or tool-argument delta, and return the aggregated generation.
    pub async fn stream_chat<F, Fut>(
        &self,
        request: &ChatRequest,
        mut on_delta: F,
    ) -> Result<AssistantMessage>
    where
        F: FnMut(StreamDelta) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let body = self.build_request_body(request);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        let mut accumulator = OpenAiStreamAccumulator::new();
        let mut byte_stream = resp.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| AgentError::LlmStreamError {
                reason: format!("stream read error: {e}"),
            })?;
            lines.push(&chunk);

            while let Some(line) = lines.next_line()? {
                if let Some(delta) = accumulator.feed_line(&line)? {
                    on_delta(delta).await;
                }

                if accumulator.is_done() {
                    return accumulator.into_message();
                }
            }
        }

        // Flush a trailing line without a newline terminator.
        if let Some(delta) = accumulator.feed_line(&lines.take_rest()?)? {
            on_delta(delta).await;
        }
        accumulator.into_message()
    }

    /// Build the JSON body for the Chat Completions API.
    fn build_request_body(&self, request: &ChatRequest) -> Value {
        let model = if request.model.is_empty() {
            self.config.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages_to_openai(&request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            body["tools"] = tools_to_openai(&request.tools);
        }

        body
    }

    /// Send the HTTP request to the `/chat/completions` endpoint.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], "sending LLM request");

        Ok(self.http.post(&url).headers(headers).json(body).send().await?)
    }
}

// ---------------------------------------------------------------------------
// Line framing
// ---------------------------------------------------------------------------

/// Splits the response body into lines.
///
/// Bytes are buffered raw and decoded one complete line at a time, so a
/// multi-byte character split across network chunks is reassembled first.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete line including its `\n`, if one is buffered.
    fn next_line(&mut self) -> Result<Option<String>> {
        let Some(pos) = self.bytes.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line: Vec<u8> = self.bytes.drain(..=pos).collect();
        decode_line(line).map(Some)
    }

    /// Whatever is left after the body ended.
    fn take_rest(&mut self) -> Result<String> {
        decode_line(std::mem::take(&mut self.bytes))
    }
}

fn decode_line(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| AgentError::LlmStreamError {
        reason: format!("invalid UTF-8 in stream: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Wire format conversion
// ---------------------------------------------------------------------------

/// Convert messages into the OpenAI wire format.
///
/// System messages stay in the `messages` array, tool calls go in
/// `assistant.tool_calls`, and tool results use `role: "tool"` with a
/// `tool_call_id`.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System => json!({ "role": "system", "content": msg.content }),
            Role::User => json!({ "role": "user", "content": msg.content }),
            Role::Assistant if msg.tool_calls.is_empty() => {
                json!({ "role": "assistant", "content": msg.content })
            }
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();

                let mut m = json!({ "role": "assistant", "tool_calls": tool_calls });
                if !msg.content.is_empty() {
                    m["content"] = json!(msg.content);
                }
                m
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content,
            }),
        })
        .collect()
}

/// Convert tool definitions into the OpenAI format.
///
/// OpenAI wraps each tool in `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
