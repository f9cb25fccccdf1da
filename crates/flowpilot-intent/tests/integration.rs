//! Integration tests for the flowpilot-intent crate.
//!
//! Detection runs against the bundled locale tables; semantic analysis runs
//! against a scripted in-process model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Map;

use flowpilot_agent::{AgentError, ChatModel, ChatRequest, ChunkStream, ModelChunk};
use flowpilot_intent::{
    DetectionMethod, FallbackAction, IntentDetector, IotScenario, ScenarioClassifier,
    ScenarioTag, SemanticAnalyzer, SuggestedTemplate, handle_fallback,
};
use flowpilot_kernel::{DirectorySource, LocaleStore};

fn detector() -> IntentDetector {
    IntentDetector::new(Arc::new(LocaleStore::bundled("en-US").unwrap()))
}

// ═══════════════════════════════════════════════════════════════════════
//  Pattern detection
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn every_query_keyword_scores_zero() {
    let detector = detector();
    let snapshot = detector.locales().snapshot();
    let keywords = snapshot.query_matcher().keywords().to_vec();
    assert!(!keywords.is_empty());

    for keyword in keywords {
        let message = format!("{keyword}, then create a new MQTT temperature flow");
        let result = detector.detect(&message);
        assert!(result.is_query_keyword, "{keyword}");
        assert!(!result.is_flow_creation, "{keyword}");
        assert_eq!(result.confidence, 0.0, "{keyword}");
    }
}

#[test]
fn confidence_is_always_bounded() {
    let detector = detector();
    let messages = [
        "",
        "hello",
        "create build make generate design flow workflow automation pipeline mqtt http modbus plc sensor dashboard",
        "帮我创建一个温度监控流程，用mqtt和modbus采集传感器数据并定时同步到数据库",
        "crear un flujo, créer un flux, erstellen flow, criar fluxo",
        "PLC是什么",
    ];
    for message in messages {
        let result = detector.detect(message);
        assert!((0.0..=1.0).contains(&result.confidence), "{message}: {}", result.confidence);
    }
}

#[test]
fn detection_is_deterministic() {
    let detector = detector();
    let message = "I want to build an automation that switches the pump when humidity drops";
    let first = detector.detect(message);
    for _ in 0..5 {
        assert_eq!(detector.detect(message), first);
    }
}

#[test]
fn chinese_monitoring_request_suggests_iot_template() {
    let result = detector().detect("创建一个温度监控流程");
    assert!(result.is_flow_creation);
    assert!(result.detected_scenarios.contains(&IotScenario::Monitoring));
    assert_eq!(result.suggested_template, SuggestedTemplate::IotMonitoring);
}

#[test]
fn english_plc_flow_is_creation_intent() {
    let result = detector().detect("create a PLC flow");
    assert!(result.is_flow_creation);
    assert!(result.matched(DetectionMethod::KeywordMatch));
    assert!(result.matched(DetectionMethod::CreationRegex));
}

#[test]
fn concept_question_is_not_creation_intent() {
    let result = detector().detect("PLC是什么");
    assert!(!result.is_flow_creation);
    assert!(!result.matched(DetectionMethod::ConfigDriven));
}

#[test]
fn configured_patterns_follow_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("xx.json");
    let locale = |pattern: &str| {
        format!(
            r#"{{"scenarios":{{"general":{{"flowCreation":{{"intentKeywords":{{
                "enhancedPatterns":[{{"pattern":"{pattern}","weight":0.8}}]}}}}}}}}}}"#
        )
    };
    std::fs::write(&path, locale("quux")).unwrap();

    let store = Arc::new(LocaleStore::new(Arc::new(DirectorySource::new(dir.path())), "xx").unwrap());
    let detector = IntentDetector::new(Arc::clone(&store));
    assert!(detector.detect("quux").matched(DetectionMethod::EnhancedRegex));

    std::fs::write(&path, locale("zork")).unwrap();
    store.reload().unwrap();
    assert!(!detector.detect("quux").matched(DetectionMethod::EnhancedRegex));
    let enhanced = &detector.detect("zork").detection_methods[&DetectionMethod::EnhancedRegex];
    assert!(enhanced.is_match);
    assert_eq!(enhanced.matched_language.as_deref(), Some("xx"));
}

#[test]
fn low_confidence_falls_back_to_chat() {
    let result = detector().detect("hello there");
    assert_eq!(handle_fallback(&result, &Map::new()), FallbackAction::Fallback);
}

// ═══════════════════════════════════════════════════════════════════════
//  Scenario classification
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn what_is_node_red_is_general() {
    assert_eq!(ScenarioClassifier::new().classify("what is Node-RED"), ScenarioTag::General);
}

// ═══════════════════════════════════════════════════════════════════════
//  Semantic analysis
// ═══════════════════════════════════════════════════════════════════════

struct Verdict {
    reply: Result<&'static str, ()>,
    calls: AtomicUsize,
}

impl Verdict {
    fn replying(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Err(()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatModel for Verdict {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "verdict-1"
    }

    async fn generate_stream(&self, _request: ChatRequest) -> flowpilot_agent::Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Ok(text) => {
                let (head, tail) = text.split_at(text.len() / 2);
                let chunks = vec![
                    Ok(ModelChunk::Text(head.to_owned())),
                    Ok(ModelChunk::Text(tail.to_owned())),
                ];
                Ok(futures::stream::iter(chunks).boxed())
            }
            Err(()) => Err(AgentError::LlmRequestFailed {
                reason: "connection refused".into(),
            }),
        }
    }
}

#[tokio::test]
async fn agreeing_verdict_raises_confidence() {
    let model = Verdict::replying(r#"{"isFlowCreation": true, "confidence": 1.0}"#);
    let detector = detector().with_semantic(SemanticAnalyzer::new(model.clone()));

    let message = "build an automation";
    let plain = detector.detect(message);
    let refined = detector.detect_async(message, true).await;

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert!(refined.confidence >= plain.confidence);
    assert!(refined.matched(DetectionMethod::SemanticAnalysis));
}

#[tokio::test]
async fn confident_disagreement_can_flip_the_decision() {
    let model = Verdict::replying("```json\n{\"isFlowCreation\": false, \"confidence\": 0.95}\n```");
    let detector = detector().with_semantic(SemanticAnalyzer::new(model));

    // Only the enhanced-regex signal fires: confidence 0.5.
    let message = "can you make the pump faster";
    let plain = detector.detect(message);
    assert!(plain.is_flow_creation, "{}", plain.confidence);

    let refined = detector.detect_async(message, true).await;
    assert!(!refined.is_flow_creation);
    assert!((refined.confidence - (plain.confidence - 0.2).max(0.0)).abs() < 1e-9);
}

#[tokio::test]
async fn agreeing_rejection_stays_rejected() {
    let model = Verdict::replying(r#"{"isFlowCreation": false, "confidence": 0.9}"#);
    let detector = detector().with_semantic(SemanticAnalyzer::new(model.clone()));

    let message = "the temperature is high";
    let plain = detector.detect(message);
    assert!(!plain.is_flow_creation);

    let refined = detector.detect_async(message, true).await;
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert!(!refined.is_flow_creation);
    assert_eq!(refined.confidence, plain.confidence);
}

#[tokio::test]
async fn failing_model_never_raises_a_rejection() {
    let detector = detector().with_semantic(SemanticAnalyzer::new(Verdict::failing()));

    let message = "the temperature is high";
    let plain = detector.detect(message);
    let refined = detector.detect_async(message, true).await;
    assert!(!refined.is_flow_creation);
    assert_eq!(refined.confidence, plain.confidence);
}

#[tokio::test]
async fn failing_model_falls_back_to_heuristic() {
    let model = Verdict::failing();
    let detector = detector().with_semantic(SemanticAnalyzer::new(model.clone()));

    let refined = detector.detect_async("please create a flow", true).await;
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert!(refined.is_flow_creation);
    let semantic = &refined.detection_methods[&DetectionMethod::SemanticAnalysis];
    assert!(semantic.is_match);
    assert_eq!(semantic.confidence, 0.6);
}

#[tokio::test]
async fn unparsable_reply_falls_back_to_heuristic() {
    let model = Verdict::replying("I think so, yes.");
    let detector = detector().with_semantic(
        SemanticAnalyzer::new(model).with_timeout(Duration::from_secs(1)),
    );
    let refined = detector.detect_async("what is a flow", true).await;
    assert!(!refined.is_flow_creation);
    assert!(!refined.matched(DetectionMethod::SemanticAnalysis));
}

#[tokio::test]
async fn query_keywords_never_reach_the_model() {
    let model = Verdict::replying(r#"{"isFlowCreation": true, "confidence": 1.0}"#);
    let detector = detector().with_semantic(SemanticAnalyzer::new(model.clone()));

    let result = detector.detect_async("show current flow", true).await;
    assert_eq!(result.confidence, 0.0);
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);

    let skipped = detector.detect_async("create a flow", false).await;
    assert!(!skipped.detection_methods.contains_key(&DetectionMethod::SemanticAnalysis));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}
