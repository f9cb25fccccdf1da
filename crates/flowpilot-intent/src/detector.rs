//! Flow-creation intent detector.
//!
//! A message is scored by five independent signals:
//!
//! | Signal | Source | Weight in confidence |
//! |--------|--------|----------------------|
//! | Config-driven | locale verb/noun/template/context tables | +0.5 |
//! | Enhanced regex | built-in table plus locale `enhancedPatterns` | +0.5 |
//! | Keyword match | [`FUZZY_KEYWORDS`] | +0.3 |
//! | Creation regex | [`CREATION_PATTERNS`] | +0.3 |
//! | IoT scenario | [`IOT_TRIGGERS`] | +0.2 |
//!
//! plus `0.1 × context score` and a multi-signal bonus.  Query phrasing short
//! circuits everything: a message containing a locale query keyword, or
//! matching the compiled query alternations, always scores zero.  That early
//! return is also what keeps the creation templates away from query-shaped
//! messages.
//!
//! The detector reads the active [`LocaleSnapshot`] on every call, so a
//! locale reload is picked up without rebuilding it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flowpilot_kernel::{
    IntentKeywords, LocaleIntents, LocaleSnapshot, LocaleStore, contains_word, normalize,
};

use crate::patterns::{
    CONTEXT_TERMS, CREATION_PATTERNS, ENHANCED_PATTERNS, FUZZY_KEYWORDS, IOT_TRIGGERS,
};
use crate::semantic::SemanticAnalyzer;
use crate::text::{strip_placeholders, term_present};

/// Confidence above which a message counts as creation intent.
pub const DECISION_THRESHOLD: f64 = 0.4;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// IoT scenario families recognised in a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IotScenario {
    DeviceControl,
    Monitoring,
    Automation,
    DataIntegration,
}

impl IotScenario {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceControl => "device_control",
            Self::Monitoring => "monitoring",
            Self::Automation => "automation",
            Self::DataIntegration => "data_integration",
        }
    }
}

impl fmt::Display for IotScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flow template suggested for a detected intent.
///
/// The ids match the templates served by the `get_flow_templates` tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedTemplate {
    IotMonitoring,
    SmartHome,
    DataIntegration,
    #[default]
    Basic,
}

impl SuggestedTemplate {
    /// Pick the template for a set of detected scenarios.
    pub fn for_scenarios(scenarios: &BTreeSet<IotScenario>) -> Self {
        if scenarios.contains(&IotScenario::Monitoring) {
            Self::IotMonitoring
        } else if scenarios.contains(&IotScenario::DeviceControl)
            || scenarios.contains(&IotScenario::Automation)
        {
            Self::SmartHome
        } else if scenarios.contains(&IotScenario::DataIntegration) {
            Self::DataIntegration
        } else {
            Self::Basic
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IotMonitoring => "iot_monitoring",
            Self::SmartHome => "smart_home",
            Self::DataIntegration => "data_integration",
            Self::Basic => "basic",
        }
    }
}

impl fmt::Display for SuggestedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of the detection signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionMethod {
    ConfigDriven,
    EnhancedRegex,
    KeywordMatch,
    CreationRegex,
    IotScenario,
    SemanticAnalysis,
}

/// Outcome of one detection signal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodResult {
    pub is_match: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
}

impl MethodResult {
    fn miss() -> Self {
        Self::default()
    }

    fn hit(confidence: f64, language: Option<&str>, pattern: impl Into<String>) -> Self {
        Self {
            is_match: true,
            confidence,
            matched_language: language.map(str::to_owned),
            matched_pattern: Some(pattern.into()),
        }
    }
}

/// The verdict for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub is_flow_creation: bool,
    /// Aggregated confidence in `[0, 1]`.
    pub confidence: f64,
    pub is_query_keyword: bool,
    pub detected_scenarios: BTreeSet<IotScenario>,
    pub suggested_template: SuggestedTemplate,
    /// Matched vocabulary, in discovery order.
    pub keywords: Vec<String>,
    /// Platform/protocol context score in `[0, 1]`.
    pub context_score: f64,
    pub detection_methods: BTreeMap<DetectionMethod, MethodResult>,
}

impl DetectionResult {
    fn query_keyword(keyword: Option<&str>) -> Self {
        Self {
            is_flow_creation: false,
            confidence: 0.0,
            is_query_keyword: true,
            detected_scenarios: BTreeSet::new(),
            suggested_template: SuggestedTemplate::Basic,
            keywords: keyword.map(|k| vec![k.to_owned()]).unwrap_or_default(),
            context_score: 0.0,
            detection_methods: BTreeMap::new(),
        }
    }

    /// Whether the named signal matched.
    pub fn matched(&self, method: DetectionMethod) -> bool {
        self.detection_methods
            .get(&method)
            .is_some_and(|m| m.is_match)
    }
}

// ---------------------------------------------------------------------------
// Configured enhanced patterns
// ---------------------------------------------------------------------------

/// Locale-configured enhanced patterns compiled for one snapshot epoch.
#[derive(Debug)]
struct ConfiguredPatterns {
    epoch: u64,
    patterns: Vec<(String, Regex, f64)>,
}

impl ConfiguredPatterns {
    fn compile(snapshot: &LocaleSnapshot) -> Self {
        let patterns = snapshot
            .enhanced_patterns()
            .filter_map(|(locale, p)| match Regex::new(&p.pattern) {
                Ok(regex) => Some((locale.to_owned(), regex, p.weight.clamp(0.0, 1.0))),
                Err(e) => {
                    warn!(locale, pattern = %p.pattern, error = %e, "skipping invalid enhanced pattern");
                    None
                }
            })
            .collect();
        Self {
            epoch: snapshot.epoch(),
            patterns,
        }
    }
}

// ---------------------------------------------------------------------------
// IntentDetector
// ---------------------------------------------------------------------------

/// Multi-signal flow-creation intent detector.
pub struct IntentDetector {
    locales: Arc<LocaleStore>,
    configured: RwLock<Option<Arc<ConfiguredPatterns>>>,
    semantic: Option<SemanticAnalyzer>,
}

impl IntentDetector {
    /// Create a detector reading tables from `locales`.
    pub fn new(locales: Arc<LocaleStore>) -> Self {
        Self {
            locales,
            configured: RwLock::new(None),
            semantic: None,
        }
    }

    /// Builder: enable the semantic-analysis pass of [`detect_async`](Self::detect_async).
    pub fn with_semantic(mut self, analyzer: SemanticAnalyzer) -> Self {
        self.semantic = Some(analyzer);
        self
    }

    /// The locale store this detector reads.
    pub fn locales(&self) -> &Arc<LocaleStore> {
        &self.locales
    }

    /// Detect flow-creation intent using the pattern signals only.
    pub fn detect(&self, message: &str) -> DetectionResult {
        let snapshot = self.locales.snapshot();
        let text = normalize(message);

        let query = snapshot.query_matcher();
        if query.is_query(&text) {
            debug!(keyword = ?query.matched_keyword(&text), "query keyword, skipping detection");
            return DetectionResult::query_keyword(query.matched_keyword(&text));
        }

        let mut keywords = Vec::new();
        let config = config_signal(&text, snapshot.intents(), &mut keywords);
        let enhanced = self.enhanced_signal(&text, &snapshot);
        let keyword = keyword_signal(&text);
        let creation = creation_signal(&text);
        let scenarios = iot_scenarios(&text, &mut keywords);
        let context_score = context_score(&text, &mut keywords);

        let mut confidence = 0.0;
        let mut matched_signals = 0;
        for (signal, weight) in [(&config, 0.5), (&enhanced, 0.5), (&keyword, 0.3), (&creation, 0.3)] {
            if signal.is_match {
                confidence += weight;
                matched_signals += 1;
            }
        }
        if !scenarios.is_empty() {
            confidence += 0.2;
        }
        confidence += 0.1 * context_score;
        if matched_signals >= 2 {
            confidence += 0.2;
        }
        if matched_signals >= 3 {
            confidence += 0.1;
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let iot = if scenarios.is_empty() {
            MethodResult::miss()
        } else {
            let names: Vec<&str> = scenarios.iter().map(|s| s.as_str()).collect();
            MethodResult::hit(1.0, None, names.join(","))
        };

        let mut methods = BTreeMap::new();
        methods.insert(DetectionMethod::ConfigDriven, config);
        methods.insert(DetectionMethod::EnhancedRegex, enhanced);
        methods.insert(DetectionMethod::KeywordMatch, keyword);
        methods.insert(DetectionMethod::CreationRegex, creation);
        methods.insert(DetectionMethod::IotScenario, iot);

        let result = DetectionResult {
            is_flow_creation: confidence > DECISION_THRESHOLD,
            confidence,
            is_query_keyword: false,
            suggested_template: SuggestedTemplate::for_scenarios(&scenarios),
            detected_scenarios: scenarios,
            keywords,
            context_score,
            detection_methods: methods,
        };

        debug!(
            is_flow_creation = result.is_flow_creation,
            confidence = result.confidence,
            signals = matched_signals,
            template = %result.suggested_template,
            "intent detected"
        );
        result
    }

    /// Detect flow-creation intent, optionally refined by semantic analysis.
    ///
    /// Without a configured analyzer, or with `use_semantic_analysis` unset,
    /// this is [`detect`](Self::detect).  Query keywords are never sent to
    /// the model.
    pub async fn detect_async(&self, message: &str, use_semantic_analysis: bool) -> DetectionResult {
        let mut result = self.detect(message);
        if !use_semantic_analysis || result.is_query_keyword {
            return result;
        }
        if let Some(analyzer) = &self.semantic {
            analyzer.refine(message, &mut result).await;
        }
        result
    }

    fn enhanced_signal(&self, text: &str, snapshot: &LocaleSnapshot) -> MethodResult {
        let configured = self.configured_for(snapshot);

        let builtin = ENHANCED_PATTERNS
            .iter()
            .map(|p| (p.language, &p.regex, p.weight));
        let from_locales = configured
            .patterns
            .iter()
            .map(|(locale, regex, weight)| (locale.as_str(), regex, *weight));

        let mut best: Option<(&str, &Regex, f64)> = None;
        for (language, regex, weight) in builtin.chain(from_locales) {
            if best.is_some_and(|(_, _, w)| w >= weight) || !regex.is_match(text) {
                continue;
            }
            best = Some((language, regex, weight));
        }

        match best {
            Some((language, regex, weight)) if weight > 0.5 => {
                MethodResult::hit(weight, Some(language), regex.as_str())
            }
            Some((language, regex, weight)) => MethodResult {
                is_match: false,
                confidence: weight,
                matched_language: Some(language.to_owned()),
                matched_pattern: Some(regex.as_str().to_owned()),
            },
            None => MethodResult::miss(),
        }
    }

    fn configured_for(&self, snapshot: &LocaleSnapshot) -> Arc<ConfiguredPatterns> {
        {
            let current = self
                .configured
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(patterns) = current.as_ref().filter(|p| p.epoch == snapshot.epoch()) {
                return Arc::clone(patterns);
            }
        }

        let compiled = Arc::new(ConfiguredPatterns::compile(snapshot));
        let mut slot = self
            .configured
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_none_or(|p| p.epoch < compiled.epoch) {
            debug!(
                epoch = compiled.epoch,
                patterns = compiled.patterns.len(),
                "enhanced patterns compiled"
            );
            *slot = Some(Arc::clone(&compiled));
        }
        compiled
    }
}

impl fmt::Debug for IntentDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntentDetector")
            .field("locale", &self.locales.locale())
            .field("semantic", &self.semantic.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

fn config_signal(text: &str, intents: &[LocaleIntents], keywords: &mut Vec<String>) -> MethodResult {
    let mut best: Option<(f64, &str, Option<String>, Vec<String>)> = None;

    for entry in intents {
        let (score, pair, hits) = score_locale(text, &entry.keywords);
        if best.as_ref().is_none_or(|(s, ..)| score > *s) {
            best = Some((score, entry.locale.as_str(), pair, hits));
        }
    }

    let Some((score, locale, pair, hits)) = best else {
        return MethodResult::miss();
    };
    push_unique(keywords, hits);

    let score = score.min(1.0);
    MethodResult {
        is_match: score > 0.3,
        confidence: score,
        matched_language: (score > 0.0).then(|| locale.to_owned()),
        matched_pattern: pair,
    }
}

/// Score one locale's tables.  Returns the score, the first co-occurring
/// verb/noun pair, and the matched vocabulary.
fn score_locale(text: &str, tables: &IntentKeywords) -> (f64, Option<String>, Vec<String>) {
    let mut score = 0.0;
    let mut first_pair = None;
    let mut hits = Vec::new();

    for verb in &tables.create_verbs {
        let verb = verb.to_lowercase();
        for noun in &tables.flow_nouns {
            let noun = noun.to_lowercase();
            let mut pair = 0.0;
            if text.contains(&verb) && text.contains(&noun) {
                pair += 0.8;
            }
            if contains_word(text, &verb) && contains_word(text, &noun) {
                pair += 0.6;
            }
            if pair > 0.0 {
                score += f64::min(pair, 1.0);
                first_pair.get_or_insert_with(|| format!("{verb}+{noun}"));
                hits.push(verb.clone());
                hits.push(noun);
            }
        }
    }

    let best_fraction = tables
        .intent_patterns
        .iter()
        .filter_map(|template| {
            let stripped = strip_placeholders(&template.to_lowercase());
            let words: Vec<&str> = stripped.split_whitespace().collect();
            if words.is_empty() {
                return None;
            }
            let present = words.iter().filter(|w| term_present(text, w)).count();
            Some(present as f64 / words.len() as f64)
        })
        .fold(0.0, f64::max);
    score += 0.3 * best_fraction;

    for keyword in &tables.context_keywords {
        if term_present(text, keyword) {
            score += 0.1;
            hits.push(keyword.to_lowercase());
        }
    }

    (score, first_pair, hits)
}

fn keyword_signal(text: &str) -> MethodResult {
    FUZZY_KEYWORDS
        .iter()
        .find(|keyword| keyword.split_whitespace().all(|part| term_present(text, part)))
        .map(|keyword| MethodResult::hit(1.0, None, *keyword))
        .unwrap_or_else(MethodResult::miss)
}

fn creation_signal(text: &str) -> MethodResult {
    CREATION_PATTERNS
        .iter()
        .find(|p| p.regex.is_match(text))
        .map(|p| MethodResult::hit(1.0, Some(p.language), p.regex.as_str()))
        .unwrap_or_else(MethodResult::miss)
}

fn iot_scenarios(text: &str, keywords: &mut Vec<String>) -> BTreeSet<IotScenario> {
    let mut found = BTreeSet::new();
    for (scenario, triggers) in IOT_TRIGGERS {
        let hits: Vec<String> = triggers
            .iter()
            .filter(|t| term_present(text, t))
            .map(|t| (*t).to_owned())
            .collect();
        if !hits.is_empty() {
            found.insert(*scenario);
            push_unique(keywords, hits);
        }
    }
    found
}

fn context_score(text: &str, keywords: &mut Vec<String>) -> f64 {
    let hits: Vec<String> = CONTEXT_TERMS
        .iter()
        .filter(|t| term_present(text, t))
        .map(|t| (*t).to_owned())
        .collect();
    let score = (0.1 * hits.len() as f64).min(1.0);
    push_unique(keywords, hits);
    score
}

fn push_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> IntentDetector {
        IntentDetector::new(Arc::new(LocaleStore::bundled("en-US").unwrap()))
    }

    #[test]
    fn query_phrasing_scores_zero() {
        let result = detector().detect("Show current flow and create a new flow");
        assert!(result.is_query_keyword);
        assert!(!result.is_flow_creation);
        assert_eq!(result.confidence, 0.0);
        assert!(result.detection_methods.is_empty());
    }

    #[test]
    fn query_phrasing_hides_creation_templates() {
        let source = flowpilot_kernel::StaticSource::new()
            .with_json(
                "xx",
                r#"{"scenarios":{"general":{"flowCreation":{"intentKeywords":{
                    "queryKeywords":["create a flow"]}}}}}"#,
            )
            .unwrap();
        let store = LocaleStore::new(Arc::new(source), "xx").unwrap();
        let detector = IntentDetector::new(Arc::new(store));

        let result = detector.detect("how do I create a flow?");
        assert!(result.is_query_keyword);
        assert!(!result.matched(DetectionMethod::CreationRegex));
        assert_eq!(result.confidence, 0.0);

        let other = detector.detect("create a new flow");
        assert!(other.matched(DetectionMethod::CreationRegex));
    }

    #[test]
    fn english_creation_fires_every_pattern_signal() {
        let result = detector().detect("create a PLC flow");
        assert!(result.is_flow_creation);
        assert!(result.matched(DetectionMethod::ConfigDriven));
        assert!(result.matched(DetectionMethod::KeywordMatch));
        assert!(result.matched(DetectionMethod::CreationRegex));
        assert!(result.keywords.contains(&"plc".to_owned()));
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.suggested_template, SuggestedTemplate::Basic);
    }

    #[test]
    fn config_signal_keeps_best_locale() {
        let result = detector().detect("创建一个温度监控流程");
        let config = &result.detection_methods[&DetectionMethod::ConfigDriven];
        assert!(config.is_match);
        assert_eq!(config.matched_language.as_deref(), Some("zh-CN"));
        assert_eq!(config.matched_pattern.as_deref(), Some("创建+流程"));
    }

    #[test]
    fn context_alone_stays_below_threshold() {
        let result = detector().detect("PLC是什么");
        assert!(!result.is_flow_creation);
        assert!((result.context_score - 0.1).abs() < 1e-9);
        assert!(result.confidence < DECISION_THRESHOLD);
    }

    #[test]
    fn weak_enhanced_weights_do_not_match() {
        let source = flowpilot_kernel::StaticSource::new()
            .with_json(
                "xx",
                r#"{"scenarios":{"general":{"flowCreation":{"intentKeywords":{
                    "enhancedPatterns":[{"pattern":"zzz","weight":0.4}]}}}}}"#,
            )
            .unwrap();
        let store = LocaleStore::new(Arc::new(source), "xx").unwrap();
        let result = IntentDetector::new(Arc::new(store)).detect("zzz");
        let enhanced = &result.detection_methods[&DetectionMethod::EnhancedRegex];
        assert!(!enhanced.is_match);
        assert_eq!(enhanced.confidence, 0.4);
    }

    #[test]
    fn template_follows_scenario_priority() {
        let all: BTreeSet<_> = [IotScenario::DataIntegration, IotScenario::Automation, IotScenario::Monitoring]
            .into_iter()
            .collect();
        assert_eq!(SuggestedTemplate::for_scenarios(&all), SuggestedTemplate::IotMonitoring);

        let control: BTreeSet<_> = [IotScenario::DataIntegration, IotScenario::DeviceControl]
            .into_iter()
            .collect();
        assert_eq!(SuggestedTemplate::for_scenarios(&control), SuggestedTemplate::SmartHome);
    }

    #[test]
    fn result_serialises_camel_case() {
        let value = serde_json::to_value(detector().detect("build a workflow")).unwrap();
        assert_eq!(value["isFlowCreation"], true);
        assert_eq!(value["suggestedTemplate"], "basic");
        assert!(value["detectionMethods"]["configDriven"]["isMatch"].as_bool().unwrap());
    }
}
