//! Core types for model interaction.
//!
//! These types are provider-agnostic; [`super::client`] translates them into
//! the Anthropic and OpenAI wire formats.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the model.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

impl Role {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content.  Empty for assistant messages that carry tool
    /// calls only.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// The tool call a [`Role::Tool`] message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Create an assistant message that contains tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content.into())
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content.into())
        }
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the model for correlating results.
    pub id: String,

    /// The name of the tool to invoke.
    pub name: String,

    /// Arguments as a JSON value.
    pub arguments: Value,
}

/// A tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Requests and chunks
// ---------------------------------------------------------------------------

/// A full request to send to a model provider.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
    /// The model identifier.  Empty means "the client's default".
    pub model: String,

    /// The conversation history.
    pub messages: Vec<Message>,

    /// Tool definitions the model may invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens the model may generate in this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One item of a model's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    /// A piece of answer text.
    Text(String),
    /// A complete tool call.
    ToolCall(ToolCall),
}

// ---------------------------------------------------------------------------
// Anthropic streaming events
// ---------------------------------------------------------------------------

/// Events emitted during SSE streaming from the Anthropic Messages API.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream has started.
    MessageStart {
        /// The message id from the API.
        message_id: String,
        /// The model that is responding.
        model: String,
    },

    /// A new content block has started (`"text"` or `"tool_use"`).
    ContentBlockStart {
        /// Zero-based index of the content block.
        index: u32,
        /// The type of content block.
        content_type: String,
        /// For tool_use blocks: the tool call id.
        id: Option<String>,
        /// For tool_use blocks: the tool name.
        name: Option<String>,
    },

    /// An incremental delta within a content block.
    ContentBlockDelta {
        /// The content block index this delta belongs to.
        index: u32,
        /// The delta variant.
        delta: StreamDelta,
    },

    /// A content block has finished streaming.
    ContentBlockStop {
        /// The content block index that stopped.
        index: u32,
    },

    /// Top-level message metadata changed.
    MessageDelta {
        /// The stop reason (`"end_turn"`, `"tool_use"`, ...).
        stop_reason: Option<String>,
    },

    /// The stream has fully terminated.
    MessageStop,

    /// A keepalive event.
    Ping,

    /// The API reported an error mid-stream.
    Error {
        /// Error message from the API.
        message: String,
    },
}

/// Incremental delta within a streaming content block.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text.
    TextDelta(String),

    /// A chunk of JSON for a tool-use input.
    InputJsonDelta(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let call = ToolCall {
            id: "c1".into(),
            name: "get_flows".into(),
            arguments: serde_json::json!({}),
        };
        let m = Message::assistant_tool_calls("", vec![call]);
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.tool_calls.len(), 1);

        let r = Message::tool_result("c1", "[]");
        assert_eq!(r.role, Role::Tool);
        assert_eq!(r.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn history_round_trips_through_json() {
        let m = Message::user("hello");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
