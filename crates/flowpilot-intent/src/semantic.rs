//! Semantic refinement of a pattern-based verdict.
//!
//! The analyzer asks a language model for a structured verdict on the
//! message and blends it into the pattern score.  A failed call, a timeout,
//! or a reply that is not the expected JSON never surfaces as an error: the
//! analyzer falls back to a coarse verb/noun heuristic instead.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use flowpilot_agent::{ChatModel, ChatRequest, Message, ModelChunk};
use flowpilot_kernel::normalize;

use crate::detector::{DECISION_THRESHOLD, DetectionMethod, DetectionResult, MethodResult};
use crate::error::{IntentError, Result};
use crate::patterns::{HEURISTIC_NOUNS, HEURISTIC_VERBS};
use crate::text::term_present;

const SEMANTIC_SYSTEM_PROMPT: &str = r#"You classify messages sent to the assistant of a visual automation-flow editor.

Decide whether the user wants a NEW flow (automation, workflow) to be created.
Questions about existing flows, concepts or configuration are not creation requests.

Respond ONLY with a JSON object:
{
  "isFlowCreation": true | false,
  "confidence": 0.0-1.0,
  "reasoning": "one short sentence"
}"#;

/// Default bound on one semantic-analysis call.
pub const DEFAULT_SEMANTIC_TIMEOUT: Duration = Duration::from_secs(15);

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Model,
    Heuristic,
}

/// A structured creation-intent verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticVerdict {
    #[serde(alias = "is_flow_creation")]
    pub is_flow_creation: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(skip, default = "model_source")]
    pub source: VerdictSource,
}

fn model_source() -> VerdictSource {
    VerdictSource::Model
}

/// Model-backed semantic analyzer.
pub struct SemanticAnalyzer {
    model: Arc<dyn ChatModel>,
    timeout: Duration,
}

impl SemanticAnalyzer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            timeout: DEFAULT_SEMANTIC_TIMEOUT,
        }
    }

    /// Builder: bound each model call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the model for a verdict.
    pub async fn analyze(&self, message: &str) -> Result<SemanticVerdict> {
        let request = ChatRequest {
            model: String::new(),
            messages: vec![Message::system(SEMANTIC_SYSTEM_PROMPT), Message::user(message)],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(256),
        };

        let call = async {
            let mut stream = self.model.generate_stream(request).await?;
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                if let ModelChunk::Text(delta) = chunk? {
                    text.push_str(&delta);
                }
            }
            Ok::<_, flowpilot_agent::AgentError>(text)
        };

        let text = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| IntentError::SemanticAnalysis {
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| IntentError::SemanticAnalysis {
                reason: format!("model call failed: {e}"),
            })?;

        parse_verdict(&text)
    }

    /// Blend a verdict into `result`.  Never fails.
    pub async fn refine(&self, message: &str, result: &mut DetectionResult) {
        let verdict = match self.analyze(message).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "semantic analysis unavailable, using keyword heuristic");
                heuristic_verdict(message)
            }
        };
        blend(result, &verdict);
    }
}

impl std::fmt::Debug for SemanticAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticAnalyzer")
            .field("provider", &self.model.provider())
            .field("model", &self.model.model_name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Parse the model's reply into a verdict.
///
/// Handles markdown code fences that models sometimes emit.
pub fn parse_verdict(text: &str) -> Result<SemanticVerdict> {
    let cleaned = text.trim();
    let cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    let cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    let cleaned = cleaned.trim();

    let mut verdict: SemanticVerdict =
        serde_json::from_str(cleaned).map_err(|e| IntentError::SemanticAnalysis {
            reason: format!("unparsable verdict: {e}"),
        })?;
    if !verdict.confidence.is_finite() {
        return Err(IntentError::SemanticAnalysis {
            reason: "confidence is not a number".into(),
        });
    }
    verdict.confidence = verdict.confidence.clamp(0.0, 1.0);
    Ok(verdict)
}

/// Coarse verdict: a creation verb and a flow noun both present.
pub fn heuristic_verdict(message: &str) -> SemanticVerdict {
    let text = normalize(message);
    let verb = HEURISTIC_VERBS.iter().any(|v| term_present(&text, v));
    let noun = HEURISTIC_NOUNS.iter().any(|n| term_present(&text, n));
    let is_flow_creation = verb && noun;
    SemanticVerdict {
        is_flow_creation,
        confidence: if is_flow_creation { 0.6 } else { 0.4 },
        reasoning: None,
        source: VerdictSource::Heuristic,
    }
}

/// Apply the blending rules to `result`.
///
/// Agreement on a creation request adds `0.3 × verdict confidence`;
/// agreement on a non-creation message leaves the score alone.  Only a
/// confident disagreement (above 0.7) changes the decision: it subtracts 0.2
/// and the threshold is re-applied.  Heuristic verdicts are recorded but
/// never move the score.
pub fn blend(result: &mut DetectionResult, verdict: &SemanticVerdict) {
    let before = result.confidence;
    if verdict.source == VerdictSource::Model {
        if verdict.is_flow_creation == result.is_flow_creation {
            if result.is_flow_creation {
                result.confidence = (result.confidence + 0.3 * verdict.confidence).min(1.0);
            }
        } else if verdict.confidence > 0.7 {
            result.confidence = (result.confidence - 0.2).max(0.0);
            result.is_flow_creation = result.confidence > DECISION_THRESHOLD;
        }
    }

    result.detection_methods.insert(
        DetectionMethod::SemanticAnalysis,
        MethodResult {
            is_match: verdict.is_flow_creation,
            confidence: verdict.confidence,
            matched_language: None,
            matched_pattern: verdict.reasoning.clone(),
        },
    );

    match verdict.source {
        VerdictSource::Model => info!(
            before,
            after = result.confidence,
            semantic = verdict.confidence,
            "semantic verdict blended"
        ),
        VerdictSource::Heuristic => debug!(
            before,
            after = result.confidence,
            "heuristic verdict blended"
        ),
    }
}
