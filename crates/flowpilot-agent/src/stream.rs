//! Stream multiplexer.
//!
//! Two upstream shapes feed a turn: the plain token stream of a model
//! generation and the step stream of the tool-calling agent (token, tool
//! decision, tool completion).  [`StreamMultiplexer`] normalises both into
//! one ordered sequence of [`CanonicalEvent`]s delivered to a single
//! callback, and guarantees:
//!
//! - exactly one `start`, always first;
//! - exactly one terminal event (`finish` or `error`), always last;
//! - nothing after the terminal event.
//!
//! The guarantee holds on every exit path: a multiplexer dropped without a
//! terminal event (early return, panic unwinding, cancelled future) emits a
//! final `error` from its `Drop` impl.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Canonical events
// ---------------------------------------------------------------------------

/// Why a turn finished successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model completed its answer.
    Stop,
    /// The tool-cycle limit was reached; the partial answer stands.
    ToolLimit,
    /// The wall-clock ceiling was reached; the partial answer stands.
    Timeout,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::ToolLimit => "tool_limit",
            Self::Timeout => "timeout",
        })
    }
}

/// The normalised event type emitted to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CanonicalEvent {
    /// First event of every turn.
    #[serde(rename = "start")]
    Start,

    /// A piece of answer text.
    #[serde(rename = "text-delta")]
    TextDelta { text: String },

    /// The agent decided to call a tool.
    #[serde(rename = "tool_call")]
    ToolCall { name: String, args: Value },

    /// A tool call completed; `content` is normalised text.
    #[serde(rename = "tool_result")]
    ToolResult { name: String, content: String },

    /// Successful terminal event.
    #[serde(rename = "finish")]
    Finish { reason: FinishReason },

    /// Failing terminal event.
    #[serde(rename = "error")]
    Error { message: String },
}

impl CanonicalEvent {
    /// Whether this event ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }
}

/// One item of the tool-calling agent's step stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStep {
    /// Generated text.
    Token(String),
    /// The model requested a tool call.
    ToolDecision { name: String, args: Value },
    /// A tool call finished with raw output.
    ToolCompletion { name: String, output: Value },
}

// ---------------------------------------------------------------------------
// Content normalisation
// ---------------------------------------------------------------------------

/// Normalise a tool result into display text.
///
/// | Shape | Result |
/// |-------|--------|
/// | string | passed through |
/// | object with array `content` | items joined by newlines (`text` fields preferred) |
/// | object with string `content` | the string |
/// | object with object `content` | that object serialised |
/// | anything else | JSON-serialised |
pub fn normalize_tool_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("content") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    Value::Object(o) => match o.get("text") {
                        Some(Value::String(t)) => t.clone(),
                        _ => item.to_string(),
                    },
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Some(Value::String(s)) => s.clone(),
            Some(inner @ Value::Object(_)) => inner.to_string(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Multiplexer
// ---------------------------------------------------------------------------

/// The caller-supplied event callback.
pub type EventSink<'a> = dyn FnMut(CanonicalEvent) + Send + 'a;

/// Per-turn event normaliser.
pub struct StreamMultiplexer<'a> {
    sink: &'a mut EventSink<'a>,
    started: bool,
    terminated: bool,
    text: String,
    tool_calls: usize,
}

impl std::fmt::Debug for StreamMultiplexer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMultiplexer")
            .field("started", &self.started)
            .field("terminated", &self.terminated)
            .field("text_len", &self.text.len())
            .field("tool_calls", &self.tool_calls)
            .finish()
    }
}

impl<'a> StreamMultiplexer<'a> {
    /// Wrap a callback.  Nothing is emitted until the first event.
    pub fn new(sink: &'a mut EventSink<'a>) -> Self {
        Self {
            sink,
            started: false,
            terminated: false,
            text: String::new(),
            tool_calls: 0,
        }
    }

    fn emit(&mut self, event: CanonicalEvent) {
        if self.terminated {
            tracing::trace!(?event, "dropping event after terminal");
            return;
        }
        if !self.started {
            self.started = true;
            (self.sink)(CanonicalEvent::Start);
        }
        if event.is_terminal() {
            self.terminated = true;
        }
        (self.sink)(event);
    }

    /// Emit `start` if it has not been emitted yet.
    pub fn start(&mut self) {
        if !self.started && !self.terminated {
            self.started = true;
            (self.sink)(CanonicalEvent::Start);
        }
    }

    /// Forward a token of the plain token stream.  Empty tokens are skipped.
    pub fn token(&mut self, text: &str) {
        if text.is_empty() || self.terminated {
            return;
        }
        self.text.push_str(text);
        self.emit(CanonicalEvent::TextDelta {
            text: text.to_owned(),
        });
    }

    /// Forward one item of the agent step stream.
    pub fn step(&mut self, step: AgentStep) {
        match step {
            AgentStep::Token(text) => self.token(&text),
            AgentStep::ToolDecision { name, args } => {
                if !self.terminated {
                    self.tool_calls += 1;
                }
                self.emit(CanonicalEvent::ToolCall { name, args });
            }
            AgentStep::ToolCompletion { name, output } => {
                let content = normalize_tool_content(&output);
                self.emit(CanonicalEvent::ToolResult { name, content });
            }
        }
    }

    /// Emit the successful terminal event.  Returns `false` if the turn had
    /// already terminated.
    pub fn finish(&mut self, reason: FinishReason) -> bool {
        if self.terminated {
            return false;
        }
        self.emit(CanonicalEvent::Finish { reason });
        true
    }

    /// Emit the failing terminal event.  Returns `false` if the turn had
    /// already terminated.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.terminated {
            return false;
        }
        self.emit(CanonicalEvent::Error {
            message: message.into(),
        });
        true
    }

    /// Whether a terminal event has been emitted.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// All text forwarded so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of `tool_call` events forwarded so far.
    pub fn tool_call_count(&self) -> usize {
        self.tool_calls
    }
}

impl Drop for StreamMultiplexer<'_> {
    fn drop(&mut self) {
        if !self.terminated {
            tracing::warn!("turn ended without a terminal event");
            self.fail("turn ended unexpectedly");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
