//! SSE stream parsing for the OpenAI Chat Completions API.
//!
//! Used for every OpenAI-compatible provider (OpenAI, DeepSeek, OpenRouter,
//! SiliconFlow, Ollama).  Each `data:` line carries a `choices[0].delta`
//! object and the stream ends with `data: [DONE]`.  Text deltas are forwarded
//! immediately; tool-call fragments are accumulated by `index` and released
//! when the stream finishes.

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::streaming::parse_arguments;
use crate::llm::types::ToolCall;

/// In-progress tool call being assembled from streaming deltas.
#[derive(Debug, Default)]
struct OpenAiToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates fragments from an OpenAI SSE stream.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    tool_call_builders: Vec<OpenAiToolCallBuilder>,
    finish_reason: Option<String>,
    done: bool,
}

impl OpenAiStreamAccumulator {
    /// Create a new empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the `[DONE]` sentinel has been received.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The `finish_reason` of the first choice, if reported.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Feed a single SSE line.  Returns the text delta it carries, if any.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON in OpenAI SSE data: {e}"),
        })?;

        if let Some(message) = v["error"]["message"].as_str() {
            return Err(AgentError::LlmStreamError {
                reason: message.to_owned(),
            });
        }

        let choice = &v["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_owned());
        }

        let delta = &choice["delta"];
        if delta.is_null() {
            return Ok(None);
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;
                while self.tool_call_builders.len() <= index {
                    self.tool_call_builders.push(OpenAiToolCallBuilder::default());
                }
                let builder = &mut self.tool_call_builders[index];

                if let Some(id) = tc["id"].as_str() {
                    builder.id = id.to_owned();
                }
                let func = &tc["function"];
                if let Some(name) = func["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = func["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        Ok(delta["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_owned))
    }

    /// Drain the completed tool calls.
    pub fn take_tool_calls(&mut self) -> Result<Vec<ToolCall>> {
        std::mem::take(&mut self.tool_call_builders)
            .into_iter()
            .filter(|b| !b.name.is_empty())
            .map(|b| {
                let arguments = parse_arguments(&b.name, &b.arguments)?;
                Ok(ToolCall {
                    id: b.id,
                    name: b.name,
                    arguments,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
