//! Agent runtime for FlowPilot.
//!
//! This crate turns a user message into a stream of canonical events: it
//! picks the scenario's tools, chooses a route (direct tool call, tool-calling
//! agent, or plain generation), runs it against a language model, and
//! normalises everything the model and the tools produce into one ordered
//! event sequence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────┐     ┌─────────────────┐
//! │ AgentOrchestrator│────>│  Agent   │────>│  ToolRegistry   │
//! │ (route, cache)   │     │ (loop)   │     │  + Selector     │
//! └────────┬─────────┘     └────┬─────┘     └─────────────────┘
//!          │                    │
//!   ┌──────┴──────┐      ┌──────┴──────┐
//!   │ StreamMulti-│      │  ChatModel  │
//!   │ plexer      │      │ (SSE/HTTP)  │
//!   └─────────────┘      └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- Model seam, provider clients, SSE parsing, and wire types.
//! - [`tools`] -- Tool registry, scenario tool selector, built-in tools and
//!   external capability providers.
//! - [`agent`] -- The tool-calling loop.
//! - [`orchestrator`] -- Turn state machine and agent cache.
//! - [`stream`] -- Canonical events and the stream multiplexer.
//! - [`store`] -- Conversation, preference and template storage seams.
//! - [`prompt`] -- Prompt templating and the explanation prompt.
//! - [`context`] -- Per-turn editor context.
//! - [`config`] -- Orchestrator limits.
//! - [`error`] -- Agent error types.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod store;
pub mod stream;
pub mod tools;

// Re-export the most commonly used types at the crate root.
pub use agent::{Agent, AgentKey, AgentRun, RunLimits, ToolOutcome};
pub use config::OrchestratorConfig;
pub use context::ContextData;
pub use error::{AgentError, Result};
pub use llm::{
    ChatModel, ChatRequest, ChunkStream, LlmClient, LlmClientConfig, Message, ModelChunk,
    ModelConfig, ModelFactory, ProviderFactory, Role, ToolCall, ToolDefinition, WireFormat,
};
pub use orchestrator::{AgentOrchestrator, Route, TurnAgent, TurnSummary, direct_arguments};
pub use prompt::Language;
pub use store::{
    ConversationStore, FlowTemplate, InMemoryStore, PreferenceStore, StoredMessage, TemplateStore,
};
pub use stream::{AgentStep, CanonicalEvent, FinishReason, StreamMultiplexer, normalize_tool_content};
pub use tools::{
    BuiltinDeps, CapabilityInfo, CapabilityProvider, ContextToolFactory, EditorHost,
    FlowsDocument, GuardedOutput, ScenarioToolSelector, Tool, ToolDescriptor, ToolOrigin,
    ToolRegistry,
};
