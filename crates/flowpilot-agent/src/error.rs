//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure.

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Configuration errors ------------------------------------------------
    /// Scenario or orchestrator configuration is missing or malformed.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// The requested model provider is not supported.
    #[error("unsupported model provider: {provider}")]
    UnsupportedProvider { provider: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the LLM provider failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The LLM response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The streaming SSE connection was interrupted or produced invalid data.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    // -- Tool errors ---------------------------------------------------------
    /// A tool name does not resolve to a registered tool.
    #[error("unknown tool: {tool_name}")]
    ToolNotFound { tool_name: String },

    /// Tool arguments did not satisfy the tool's parameter schema.
    #[error("invalid arguments for `{tool_name}`: {reason}")]
    InvalidToolArguments { tool_name: String, reason: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// A tool's parameter schema could not be compiled.
    #[error("invalid parameter schema for `{tool_name}`: {reason}")]
    InvalidToolSchema { tool_name: String, reason: String },

    // -- Turn errors ---------------------------------------------------------
    /// The turn exceeded its wall-clock ceiling.
    #[error("turn timed out after {seconds}s")]
    TurnTimeout { seconds: u64 },

    /// The conversation store rejected an operation.
    #[error("conversation store error: {reason}")]
    Store { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] flowpilot_kernel::KernelError),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether this error belongs to the configuration class (fatal before
    /// any model call).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::UnsupportedProvider { .. }
                | Self::MissingApiKey { .. }
                | Self::Kernel(_)
        )
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
