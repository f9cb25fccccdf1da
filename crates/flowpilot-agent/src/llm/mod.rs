//! Model access: the [`ChatModel`] seam, provider clients, SSE parsing, and
//! provider-agnostic wire types.

pub mod client;
pub mod model;
pub mod streaming;
pub mod streaming_openai;
pub mod types;

pub use client::{LlmClient, LlmClientConfig, WireFormat};
pub use model::{
    ChatModel, ChunkStream, ModelConfig, ModelFactory, PROVIDERS, ProviderFactory, ProviderSpec,
    provider_spec,
};
pub use types::{ChatRequest, Message, ModelChunk, Role, ToolCall, ToolDefinition};
