//! Intent detection and scenario classification for FlowPilot.
//!
//! This crate provides:
//!
//! - **Intent detection**: a multi-signal scorer deciding whether a message
//!   asks for a new flow, via [`detector::IntentDetector`], with optional
//!   model-backed refinement via [`semantic::SemanticAnalyzer`].
//! - **Scenario classification**: keyword-priority mapping of a message to
//!   a conversational scenario via [`scenario::ScenarioClassifier`].
//! - **Assist helpers**: prompt enhancement, confirmation, parameter
//!   collection and low-confidence fallback in [`assist`].

pub mod assist;
pub mod detector;
pub mod error;
pub mod patterns;
pub mod scenario;
pub mod semantic;
mod text;

pub use assist::{
    FallbackAction, ParameterRequirement, collect_parameters, enhance_prompt,
    generate_confirmation_message, handle_fallback,
};
pub use detector::{
    DECISION_THRESHOLD, DetectionMethod, DetectionResult, IntentDetector, IotScenario,
    MethodResult, SuggestedTemplate,
};
pub use error::{IntentError, Result};
pub use scenario::{ScenarioClassifier, ScenarioTag};
pub use semantic::{SemanticAnalyzer, SemanticVerdict, VerdictSource};
