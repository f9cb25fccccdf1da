//! Multi-provider streaming model client.
//!
//! Supports the **Anthropic Messages API** and the **OpenAI Chat Completions
//! API** (including the OpenAI-compatible endpoints of DeepSeek, OpenRouter,
//! SiliconFlow and Ollama).  Every generation is streamed: the HTTP response
//! is parsed on a background task that forwards [`ModelChunk`]s through a
//! channel, so the caller sees text as soon as it arrives.

use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::model::{ChatModel, ChunkStream};
use crate::llm::streaming::{AnthropicStreamState, LineBuffer, SseParser};
use crate::llm::streaming_openai::OpenAiStreamAccumulator;
use crate::llm::types::{ChatRequest, Message, ModelChunk, Role, ToolDefinition};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default output token ceiling.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Default HTTP timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI Chat Completions API and compatible endpoints.
    OpenAi,
}

/// Configuration for connecting to a single provider endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Provider identifier, used for logging and [`ChatModel::provider`].
    pub provider: String,
    /// Wire protocol.
    pub wire: WireFormat,
    /// API key.  May be empty for local endpoints.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Default model identifier.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl LlmClientConfig {
    /// Create a configuration with default limits.
    pub fn new(
        provider: impl Into<String>,
        wire: WireFormat,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            wire,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            default_model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A streaming client for one provider endpoint.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// The client configuration.
    pub fn config(&self) -> &LlmClientConfig {
        &self.config
    }

    // -- Request building ----------------------------------------------------

    /// Build the JSON body for the configured wire format.
    pub fn build_request_body(&self, request: &ChatRequest) -> Value {
        let model = if request.model.is_empty() {
            self.config.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = match self.config.wire {
            WireFormat::Anthropic => {
                let (system, messages) = messages_to_anthropic(&request.messages);
                let mut body = json!({ "model": model, "messages": messages });
                if let Some(system) = system {
                    body["system"] = json!(system);
                }
                if !request.tools.is_empty() {
                    body["tools"] = tools_to_anthropic(&request.tools);
                }
                body
            }
            WireFormat::OpenAi => {
                let mut body = json!({
                    "model": model,
                    "messages": messages_to_openai(&request.messages),
                });
                if !request.tools.is_empty() {
                    body["tools"] = tools_to_openai(&request.tools);
                }
                body
            }
        };

        body["max_tokens"] = json!(request.max_tokens.unwrap_or(self.config.max_tokens));
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        body["stream"] = json!(true);
        body
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match self.config.wire {
            WireFormat::Anthropic => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                        AgentError::LlmRequestFailed {
                            reason: format!("invalid API key header: {e}"),
                        }
                    })?,
                );
                headers.insert(
                    "anthropic-version",
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                );
            }
            WireFormat::OpenAi => {
                if !self.config.api_key.is_empty() {
                    let auth = format!("Bearer {}", self.config.api_key);
                    headers.insert(
                        AUTHORIZATION,
                        HeaderValue::from_str(&auth).map_err(|e| AgentError::LlmRequestFailed {
                            reason: format!("invalid authorization header: {e}"),
                        })?,
                    );
                }
            }
        }
        Ok(headers)
    }

    fn endpoint(&self) -> String {
        match self.config.wire {
            WireFormat::Anthropic => format!("{}/v1/messages", self.config.base_url),
            WireFormat::OpenAi => format!("{}/chat/completions", self.config.base_url),
        }
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let url = self.endpoint();
        tracing::debug!(
            url = %url,
            model = %body["model"],
            provider = %self.config.provider,
            "sending model request"
        );

        let resp = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::LlmRequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    fn model_name(&self) -> &str {
        &self.config.default_model
    }

    async fn generate_stream(&self, request: ChatRequest) -> Result<ChunkStream> {
        let body = self.build_request_body(&request);
        let resp = self.send(&body).await?;

        let (tx, rx) = mpsc::unbounded::<Result<ModelChunk>>();
        let wire = self.config.wire;
        tokio::spawn(async move {
            let outcome = match wire {
                WireFormat::Anthropic => pump_anthropic(resp, &tx).await,
                WireFormat::OpenAi => pump_openai(resp, &tx).await,
            };
            if let Err(e) = outcome {
                let _ = tx.unbounded_send(Err(e));
            }
        });

        Ok(rx.boxed())
    }
}

// ---------------------------------------------------------------------------
// Stream pumps
// ---------------------------------------------------------------------------

type ChunkSender = mpsc::UnboundedSender<Result<ModelChunk>>;

/// Forward a chunk; returns `false` once the consumer has gone away.
fn forward(tx: &ChunkSender, chunk: ModelChunk) -> bool {
    tx.unbounded_send(Ok(chunk)).is_ok()
}

async fn pump_anthropic(resp: reqwest::Response, tx: &ChunkSender) -> Result<()> {
    let mut parser = SseParser::new();
    let mut state = AnthropicStreamState::new();
    let mut lines = LineBuffer::new();
    let mut bytes = resp.bytes_stream();

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(|e| AgentError::LlmStreamError {
            reason: format!("stream read error: {e}"),
        })?;
        for line in lines.push(&chunk)? {
            if let Some(event) = parser.parse_line(&line)? {
                if let Some(out) = state.apply(event)? {
                    if !forward(tx, out) {
                        return Ok(());
                    }
                }
                if state.is_done() {
                    return Ok(());
                }
            }
        }
    }

    if let Some(line) = lines.finish()? {
        if let Some(event) = parser.parse_line(&line)? {
            if let Some(out) = state.apply(event)? {
                forward(tx, out);
            }
        }
    }
    Ok(())
}

async fn pump_openai(resp: reqwest::Response, tx: &ChunkSender) -> Result<()> {
    let mut acc = OpenAiStreamAccumulator::new();
    let mut lines = LineBuffer::new();
    let mut bytes = resp.bytes_stream();

    'read: while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(|e| AgentError::LlmStreamError {
            reason: format!("stream read error: {e}"),
        })?;
        for line in lines.push(&chunk)? {
            if let Some(text) = acc.feed_line(&line)? {
                if !forward(tx, ModelChunk::Text(text)) {
                    return Ok(());
                }
            }
            if acc.is_done() {
                break 'read;
            }
        }
    }

    if !acc.is_done() {
        if let Some(line) = lines.finish()? {
            if let Some(text) = acc.feed_line(&line)? {
                forward(tx, ModelChunk::Text(text));
            }
        }
    }

    for call in acc.take_tool_calls()? {
        if !forward(tx, ModelChunk::ToolCall(call)) {
            break;
        }
    }
    Ok(())
}

// ===========================================================================
// Anthropic format conversion
// ===========================================================================

/// Split the system message out (Anthropic expects it as a top-level field)
/// and convert the remaining messages to the Anthropic wire format.
///
/// Consecutive tool results are merged into one `user` message.
fn messages_to_anthropic(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => match &mut system {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&msg.content);
                }
                None => system = Some(msg.content.clone()),
            },
            Role::User => wire.push(json!({ "role": "user", "content": msg.content })),
            Role::Assistant if msg.tool_calls.is_empty() => {
                wire.push(json!({ "role": "assistant", "content": msg.content }));
            }
            Role::Assistant => {
                let mut content: Vec<Value> = Vec::new();
                if !msg.content.is_empty() {
                    content.push(json!({ "type": "text", "text": msg.content }));
                }
                for tc in &msg.tool_calls {
                    content.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                wire.push(json!({ "role": "assistant", "content": content }));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id,
                    "content": msg.content,
                });
                let previous = wire
                    .last_mut()
                    .filter(|last| is_tool_result_message(last))
                    .and_then(|last| last["content"].as_array_mut());
                if let Some(blocks) = previous {
                    blocks.push(block);
                } else {
                    wire.push(json!({ "role": "user", "content": [block] }));
                }
            }
        }
    }

    (system, wire)
}

fn is_tool_result_message(message: &Value) -> bool {
    message["role"] == "user"
        && message["content"]
            .as_array()
            .is_some_and(|c| c.iter().all(|b| b["type"] == "tool_result"))
}

/// Convert tool definitions into the Anthropic API format.
fn tools_to_anthropic(tools: &[ToolDefinition]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect(),
    )
}

// ===========================================================================
// OpenAI format conversion
// ===========================================================================

/// Convert internal messages to the OpenAI Chat Completions wire format.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System | Role::User => json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            }),
            Role::Assistant if msg.tool_calls.is_empty() => json!({
                "role": "assistant",
                "content": msg.content,
            }),
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

/// Convert tool definitions into the OpenAI format
/// (`{"type": "function", "function": {...}}`).
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    Value::Array(
        tools
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
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ToolCall;

    fn client(wire: WireFormat) -> LlmClient {
        LlmClient::new(LlmClientConfig::new(
            "test",
            wire,
            "key",
            "model-x",
            "http://localhost:9/v1/",
        ))
        .unwrap()
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "get_flow".into(),
            arguments: json!({ "id": "f1" }),
        }
    }

    #[test]
    fn anthropic_body_lifts_system_prompt() {
        let request = ChatRequest {
            messages: vec![Message::system("sys"), Message::user("hi")],
            temperature: Some(0.2),
            ..ChatRequest::default()
        };
        let body = client(WireFormat::Anthropic).build_request_body(&request);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["model"], "model-x");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn anthropic_merges_consecutive_tool_results() {
        let messages = vec![
            Message::user("go"),
            Message::assistant_tool_calls("", vec![call("a"), call("b")]),
            Message::tool_result("a", "r1"),
            Message::tool_result("b", "r2"),
        ];
        let (_, wire) = messages_to_anthropic(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(wire[2]["content"][1]["tool_use_id"], "b");
    }

    #[test]
    fn openai_body_keeps_system_in_messages() {
        let request = ChatRequest {
            model: "override".into(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "get_flows".into(),
                description: "List flows".into(),
                input_schema: json!({ "type": "object" }),
            }],
            max_tokens: Some(100),
            ..ChatRequest::default()
        };
        let body = client(WireFormat::OpenAi).build_request_body(&request);
        assert_eq!(body["model"], "override");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["tools"][0]["function"]["name"], "get_flows");
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn openai_tool_call_arguments_are_strings() {
        let wire = messages_to_openai(&[
            Message::assistant_tool_calls("", vec![call("c1")]),
            Message::tool_result("c1", "{}"),
        ]);
        assert_eq!(wire[0]["tool_calls"][0]["function"]["arguments"], r#"{"id":"f1"}"#);
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "c1");
    }

    #[test]
    fn endpoints_per_wire_format() {
        assert_eq!(
            client(WireFormat::OpenAi).endpoint(),
            "http://localhost:9/v1/chat/completions"
        );
        assert_eq!(
            client(WireFormat::Anthropic).endpoint(),
            "http://localhost:9/v1/v1/messages"
        );
    }

    #[test]
    fn headers_per_wire_format() {
        let anthropic = client(WireFormat::Anthropic).headers().unwrap();
        assert_eq!(anthropic["x-api-key"], "key");
        assert!(anthropic.get(AUTHORIZATION).is_none());

        let openai = client(WireFormat::OpenAi).headers().unwrap();
        assert_eq!(openai[AUTHORIZATION], "Bearer key");
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_before_streaming() {
        let err = client(WireFormat::OpenAi)
            .generate_stream(ChatRequest::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::LlmRequestFailed { .. }));
    }
}
