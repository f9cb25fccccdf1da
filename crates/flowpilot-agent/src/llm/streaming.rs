//! SSE stream parsing for the Anthropic Messages API.
//!
//! The Anthropic streaming format sends `event:` and `data:` lines in
//! standard SSE format.  [`SseParser`] turns those lines into typed
//! [`StreamEvent`] values and [`AnthropicStreamState`] folds the events into
//! [`ModelChunk`]s: text is forwarded as it arrives, tool calls once their
//! content block closes.
//!
//! [`LineBuffer`] splits raw response bytes into lines for both wire formats.

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::{ModelChunk, StreamDelta, StreamEvent, ToolCall};

// ---------------------------------------------------------------------------
// Line splitting
// ---------------------------------------------------------------------------

/// Splits a byte stream into `\n`-terminated lines.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every complete line.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode(&raw[..raw.len() - 1])?);
        }
        Ok(lines)
    }

    /// Return the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Result<Option<String>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let raw = std::mem::take(&mut self.pending);
        decode(&raw).map(Some)
    }
}

fn decode(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| AgentError::LlmStreamError {
        reason: format!("invalid UTF-8 in stream: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Anthropic SSE parser
// ---------------------------------------------------------------------------

/// Parses raw SSE lines from the Anthropic Messages API stream.
///
/// Keeps the most recent `event:` type because each event spans an
/// `event:` line followed by a `data:` line.
#[derive(Debug, Default)]
pub struct SseParser {
    current_event_type: Option<String>,
}

impl SseParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line from the SSE stream.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<StreamEvent>> {
        let line = line.trim_end();

        if line.starts_with(':') || line.is_empty() {
            return Ok(None);
        }

        if let Some(event_type) = line.strip_prefix("event:") {
            self.current_event_type = Some(event_type.trim().to_owned());
            return Ok(None);
        }

        if let Some(data) = line.strip_prefix("data:") {
            let event_type = self
                .current_event_type
                .take()
                .unwrap_or_else(|| "unknown".into());
            return self.parse_event(&event_type, data.trim_start());
        }

        tracing::trace!(line, "ignoring unrecognised SSE line");
        Ok(None)
    }

    fn parse_event(&self, event_type: &str, data: &str) -> Result<Option<StreamEvent>> {
        match event_type {
            "message_start" => {
                let v = parse_json(data)?;
                let message = &v["message"];
                Ok(Some(StreamEvent::MessageStart {
                    message_id: json_string(message, "id"),
                    model: json_string(message, "model"),
                }))
            }

            "content_block_start" => {
                let v = parse_json(data)?;
                let block = &v["content_block"];
                Ok(Some(StreamEvent::ContentBlockStart {
                    index: json_index(&v),
                    content_type: json_string(block, "type"),
                    id: block["id"].as_str().map(String::from),
                    name: block["name"].as_str().map(String::from),
                }))
            }

            "content_block_delta" => {
                let v = parse_json(data)?;
                let delta_obj = &v["delta"];
                let delta = match delta_obj["type"].as_str().unwrap_or_default() {
                    "text_delta" => StreamDelta::TextDelta(json_string(delta_obj, "text")),
                    "input_json_delta" => {
                        StreamDelta::InputJsonDelta(json_string(delta_obj, "partial_json"))
                    }
                    other => {
                        tracing::trace!(delta_type = other, "ignoring delta type");
                        return Ok(None);
                    }
                };
                Ok(Some(StreamEvent::ContentBlockDelta {
                    index: json_index(&v),
                    delta,
                }))
            }

            "content_block_stop" => {
                let v = parse_json(data)?;
                Ok(Some(StreamEvent::ContentBlockStop {
                    index: json_index(&v),
                }))
            }

            "message_delta" => {
                let v = parse_json(data)?;
                let stop_reason = v["delta"]["stop_reason"].as_str().map(String::from);
                Ok(Some(StreamEvent::MessageDelta { stop_reason }))
            }

            "message_stop" => Ok(Some(StreamEvent::MessageStop)),

            "ping" => Ok(Some(StreamEvent::Ping)),

            "error" => {
                let v = parse_json(data)?;
                Ok(Some(StreamEvent::Error {
                    message: json_string(&v["error"], "message"),
                }))
            }

            _ => {
                if data.trim() == "[DONE]" {
                    Ok(Some(StreamEvent::MessageStop))
                } else {
                    tracing::trace!(event_type, "ignoring unknown SSE event type");
                    Ok(None)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Anthropic chunk folding
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ToolCallBuilder {
    index: u32,
    id: String,
    name: String,
    input_json: String,
}

/// Turns Anthropic stream events into [`ModelChunk`]s.
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    open_tools: Vec<ToolCallBuilder>,
    stop_reason: Option<String>,
    done: bool,
}

impl AnthropicStreamState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The stop reason reported by the API, if any.
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Apply one event, returning the chunk it completes (if any).
    pub fn apply(&mut self, event: StreamEvent) -> Result<Option<ModelChunk>> {
        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_type,
                id,
                name,
            } if content_type == "tool_use" => {
                self.open_tools.push(ToolCallBuilder {
                    index,
                    id: id.unwrap_or_default(),
                    name: name.unwrap_or_default(),
                    input_json: String::new(),
                });
                Ok(None)
            }

            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                StreamDelta::TextDelta(text) if !text.is_empty() => {
                    Ok(Some(ModelChunk::Text(text)))
                }
                StreamDelta::TextDelta(_) => Ok(None),
                StreamDelta::InputJsonDelta(json) => {
                    if let Some(builder) = self.open_tools.iter_mut().find(|b| b.index == index) {
                        builder.input_json.push_str(&json);
                    }
                    Ok(None)
                }
            },

            StreamEvent::ContentBlockStop { index } => {
                let Some(pos) = self.open_tools.iter().position(|b| b.index == index) else {
                    return Ok(None);
                };
                let builder = self.open_tools.remove(pos);
                let arguments = parse_arguments(&builder.name, &builder.input_json)?;
                Ok(Some(ModelChunk::ToolCall(ToolCall {
                    id: builder.id,
                    name: builder.name,
                    arguments,
                })))
            }

            StreamEvent::MessageDelta { stop_reason } => {
                self.stop_reason = stop_reason;
                Ok(None)
            }

            StreamEvent::MessageStop => {
                self.done = true;
                Ok(None)
            }

            StreamEvent::Error { message } => Err(AgentError::LlmStreamError { reason: message }),

            _ => Ok(None),
        }
    }
}

/// Parse accumulated tool-call argument JSON; empty input means `{}`.
pub(crate) fn parse_arguments(tool_name: &str, raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| AgentError::LlmParseFailed {
        reason: format!("invalid JSON in tool call `{tool_name}` input: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_json(data: &str) -> Result<Value> {
    serde_json::from_str(data).map_err(|e| AgentError::LlmParseFailed {
        reason: format!("invalid JSON in SSE data: {e}"),
    })
}

fn json_string(v: &Value, field: &str) -> String {
    v[field].as_str().unwrap_or_default().to_owned()
}

fn json_index(v: &Value) -> u32 {
    v["index"].as_u64().unwrap_or(0) as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
