//! Intent engine error types.
//!
//! Detection itself never fails: the synchronous path is total and the
//! semantic path falls back to a keyword heuristic.  [`IntentError`] covers
//! the fallible building blocks underneath.

/// Unified error type for the intent engine.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    // -- Semantic analysis ---------------------------------------------------
    /// The semantic-analysis model call failed or returned an unusable verdict.
    #[error("semantic analysis failed: {reason}")]
    SemanticAnalysis { reason: String },

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] flowpilot_kernel::KernelError),

    /// An error propagated from the agent crate.
    #[error("agent error: {0}")]
    Agent(#[from] flowpilot_agent::AgentError),

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.
    #[error("internal intent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
