//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

use std::path::PathBuf;

/// Unified error type for the FlowPilot kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Locale configuration errors ----------------------------------------
    /// No pattern source file exists for the requested locale.
    #[error("locale configuration not found for `{locale}` under {dir}")]
    ConfigMissing { locale: String, dir: PathBuf },

    /// A locale file exists but could not be parsed.
    #[error("failed to parse locale configuration {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    /// The requested scenario is not defined for the active locale.
    #[error("scenario not configured: {scenario} (locale {locale})")]
    ScenarioNotFound { scenario: String, locale: String },

    /// The requested locale is not offered by the pattern source.
    #[error("unknown locale: {locale}")]
    UnknownLocale { locale: String },

    // -- Pattern errors -----------------------------------------------------
    /// A regex pattern supplied through configuration is invalid.
    #[error("invalid regex pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Building the internal automaton failed.
    #[error("matcher build error: {reason}")]
    MatcherBuildError { reason: String },

    // -- Upstream errors ----------------------------------------------------
    /// Filesystem access failed while reading locale files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// File system notification error.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
