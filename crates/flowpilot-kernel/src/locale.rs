//! Locale pattern store.
//!
//! Every locale ships one pattern file describing its conversational
//! scenarios (system prompt, dynamic inputs, permitted tools, keyword routes)
//! and the keyword tables used for flow-creation intent detection.  The
//! [`LocaleStore`] turns those files into an immutable [`LocaleSnapshot`]:
//!
//! - Scenario configuration comes from the *active* locale only.
//! - Intent keyword tables and query keywords are aggregated across *all*
//!   locales offered by the source, so a Chinese message is still recognised
//!   while the editor runs in English.
//!
//! Readers clone an `Arc<LocaleSnapshot>` and never observe a partially
//! updated table: [`LocaleStore::reload`] and [`LocaleStore::set_locale`]
//! build a complete replacement before swapping it in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{KernelError, Result};
use crate::matcher::{QueryMatcher, normalize};

/// Scenario key used for conceptual, tool-free conversation.
pub const GENERAL_SCENARIO: &str = "general";

// ---------------------------------------------------------------------------
// Pattern file types
// ---------------------------------------------------------------------------

/// Contents of one locale pattern file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocaleConfig {
    /// Scenario definitions keyed by scenario name.
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,
}

/// Configuration of a single conversational scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    /// The scenario key.  Filled from the map key when the file is loaded.
    #[serde(default)]
    pub key: String,

    /// System prompt with `{{placeholder}}` slots.
    #[serde(default, alias = "systemPromptTemplate")]
    pub system_prompt: String,

    /// Placeholders the prompt expects to be filled per turn.
    #[serde(default)]
    pub dynamic_inputs: Vec<String>,

    /// Explicit tool list.  `None` means "no explicit list".
    #[serde(default)]
    pub tools: Option<Vec<String>>,

    /// Keyword routes that redirect a message into another scenario.
    #[serde(default)]
    pub keywords: Vec<KeywordRoute>,

    /// Flow-creation keyword tables contributed by this scenario.
    #[serde(default)]
    pub flow_creation: Option<FlowCreationConfig>,
}

/// A keyword-triggered scenario redirect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRoute {
    /// Phrases; any one of them contained in the message triggers the route.
    #[serde(default)]
    pub key: Vec<String>,

    /// Target scenario.
    pub scenario: String,

    /// Replacement user prompt.  `{message}` expands to the original text.
    #[serde(default)]
    pub new_human_prompt: Option<String>,
}

/// Wrapper matching the `flowCreation` object of the pattern file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCreationConfig {
    /// Keyword tables for intent detection.
    #[serde(default)]
    pub intent_keywords: IntentKeywords,
}

/// Flow-creation keyword tables of one locale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentKeywords {
    /// Creation verbs ("create", "创建").
    #[serde(default)]
    pub create_verbs: Vec<String>,

    /// Flow nouns ("flow", "流程").
    #[serde(default)]
    pub flow_nouns: Vec<String>,

    /// Example intent sentences; `{placeholder}` words are ignored when
    /// scoring.
    #[serde(default)]
    pub intent_patterns: Vec<String>,

    /// Domain context keywords ("sensor", "mqtt").
    #[serde(default)]
    pub context_keywords: Vec<String>,

    /// Query phrases that must never count as creation intent.
    #[serde(default)]
    pub query_keywords: Vec<String>,

    /// Additional weighted regexes for the enhanced-regex signal.
    #[serde(default)]
    pub enhanced_patterns: Vec<WeightedPattern>,
}

impl IntentKeywords {
    /// Append every table of `other` to `self`, skipping duplicates.
    fn merge(&mut self, other: &IntentKeywords) {
        extend_unique(&mut self.create_verbs, &other.create_verbs);
        extend_unique(&mut self.flow_nouns, &other.flow_nouns);
        extend_unique(&mut self.intent_patterns, &other.intent_patterns);
        extend_unique(&mut self.context_keywords, &other.context_keywords);
        extend_unique(&mut self.query_keywords, &other.query_keywords);
        for pattern in &other.enhanced_patterns {
            if !self
                .enhanced_patterns
                .iter()
                .any(|p| p.pattern == pattern.pattern)
            {
                self.enhanced_patterns.push(pattern.clone());
            }
        }
    }

    /// Whether every table is empty.
    pub fn is_empty(&self) -> bool {
        self.create_verbs.is_empty()
            && self.flow_nouns.is_empty()
            && self.intent_patterns.is_empty()
            && self.context_keywords.is_empty()
            && self.query_keywords.is_empty()
            && self.enhanced_patterns.is_empty()
    }
}

/// A regex with a literal weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPattern {
    /// The regex source.
    pub pattern: String,
    /// Weight contributed when the pattern matches.
    pub weight: f64,
}

fn extend_unique(target: &mut Vec<String>, source: &[String]) {
    for item in source {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where locale pattern files come from.
pub trait LocaleSource: Send + Sync {
    /// Locales offered by this source, sorted.
    fn locales(&self) -> Result<Vec<String>>;

    /// Load and parse the pattern file of one locale.
    fn load(&self, locale: &str) -> Result<LocaleConfig>;
}

/// Reads `<dir>/<locale>.json` or `<dir>/<locale>.toml`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    /// Create a source rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this source reads from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn parse_file(path: &Path) -> Result<LocaleConfig> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        if is_toml {
            toml::from_str(&content).map_err(|e| KernelError::ConfigParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        } else {
            serde_json::from_str(&content).map_err(|e| KernelError::ConfigParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }
}

impl LocaleSource for DirectorySource {
    fn locales(&self) -> Result<Vec<String>> {
        let mut locales = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("json") | Some("toml")) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                locales.push(stem.to_owned());
            }
        }
        locales.sort();
        locales.dedup();
        Ok(locales)
    }

    fn load(&self, locale: &str) -> Result<LocaleConfig> {
        for ext in ["json", "toml"] {
            let path = self.dir.join(format!("{locale}.{ext}"));
            if path.is_file() {
                debug!(path = %path.display(), "reading locale file");
                return Self::parse_file(&path);
            }
        }
        Err(KernelError::ConfigMissing {
            locale: locale.to_owned(),
            dir: self.dir.clone(),
        })
    }
}

/// In-memory source, used for the bundled defaults and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    configs: BTreeMap<String, LocaleConfig>,
}

impl StaticSource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// The locale files compiled into the binary (`en-US`, `zh-CN`).
    pub fn bundled() -> Result<Self> {
        Self::new()
            .with_json("en-US", include_str!("../locales/en-US.json"))?
            .with_json("zh-CN", include_str!("../locales/zh-CN.json"))
    }

    /// Builder: add a parsed config.
    pub fn with_locale(mut self, locale: impl Into<String>, config: LocaleConfig) -> Self {
        self.configs.insert(locale.into(), config);
        self
    }

    /// Builder: add a config from JSON text.
    pub fn with_json(self, locale: &str, json: &str) -> Result<Self> {
        let config: LocaleConfig =
            serde_json::from_str(json).map_err(|e| KernelError::ConfigParse {
                path: PathBuf::from(format!("<bundled:{locale}>")),
                reason: e.to_string(),
            })?;
        Ok(self.with_locale(locale, config))
    }
}

impl LocaleSource for StaticSource {
    fn locales(&self) -> Result<Vec<String>> {
        Ok(self.configs.keys().cloned().collect())
    }

    fn load(&self, locale: &str) -> Result<LocaleConfig> {
        self.configs
            .get(locale)
            .cloned()
            .ok_or_else(|| KernelError::UnknownLocale {
                locale: locale.to_owned(),
            })
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Intent keyword tables of one locale, merged across its scenarios.
#[derive(Debug, Clone)]
pub struct LocaleIntents {
    /// Locale identifier (e.g. `zh-CN`).
    pub locale: String,
    /// Merged tables.
    pub keywords: IntentKeywords,
}

/// The result of matching a message against the keyword routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedPrompt {
    /// Scenario the message is redirected to.
    pub scenario: String,
    /// The user prompt to send (rewritten or original).
    pub prompt: String,
    /// The phrase that triggered the route.
    pub matched: String,
}

/// An immutable view of the loaded pattern tables.
#[derive(Debug)]
pub struct LocaleSnapshot {
    locale: String,
    epoch: u64,
    scenarios: BTreeMap<String, ScenarioConfig>,
    intents: Vec<LocaleIntents>,
    query: QueryMatcher,
}

impl LocaleSnapshot {
    /// Build a snapshot for `locale` from `source`.
    pub fn build(source: &dyn LocaleSource, locale: &str, epoch: u64) -> Result<Self> {
        let available = source.locales()?;
        if !available.iter().any(|l| l == locale) {
            return Err(KernelError::UnknownLocale {
                locale: locale.to_owned(),
            });
        }

        let active = source.load(locale)?;
        let scenarios: BTreeMap<String, ScenarioConfig> = active
            .scenarios
            .into_iter()
            .map(|(key, mut config)| {
                config.key = key.clone();
                (key, config)
            })
            .collect();

        // Active locale first so ties in best-of scoring favour it.
        let mut order: Vec<&String> = available.iter().filter(|l| *l == locale).collect();
        order.extend(available.iter().filter(|l| *l != locale));

        let mut intents = Vec::with_capacity(order.len());
        let mut query_keywords: Vec<String> = Vec::new();
        for name in order {
            let tables = if name == locale {
                merged_intents(scenarios.values())
            } else {
                let config = source.load(name)?;
                merged_intents(config.scenarios.values())
            };
            query_keywords.extend(tables.query_keywords.iter().cloned());
            if !tables.is_empty() {
                intents.push(LocaleIntents {
                    locale: name.clone(),
                    keywords: tables,
                });
            }
        }

        let query = QueryMatcher::new(&query_keywords)?;

        info!(
            locale,
            epoch,
            scenarios = scenarios.len(),
            intent_locales = intents.len(),
            query_keywords = query.len(),
            "locale snapshot built"
        );

        Ok(Self {
            locale: locale.to_owned(),
            epoch,
            scenarios,
            intents,
            query,
        })
    }

    /// The active locale.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Monotonic build counter; a newer snapshot always has a larger epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Look up a scenario of the active locale.
    pub fn scenario(&self, key: &str) -> Option<&ScenarioConfig> {
        self.scenarios.get(key)
    }

    /// Look up a scenario, failing with [`KernelError::ScenarioNotFound`].
    pub fn require_scenario(&self, key: &str) -> Result<&ScenarioConfig> {
        self.scenario(key).ok_or_else(|| KernelError::ScenarioNotFound {
            scenario: key.to_owned(),
            locale: self.locale.clone(),
        })
    }

    /// All scenario keys of the active locale.
    pub fn scenario_keys(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    /// Intent keyword tables of every locale, active locale first.
    pub fn intents(&self) -> &[LocaleIntents] {
        &self.intents
    }

    /// Aggregated query-keyword matcher.
    pub fn query_matcher(&self) -> &QueryMatcher {
        &self.query
    }

    /// Every configured enhanced pattern, tagged with its locale.
    pub fn enhanced_patterns(&self) -> impl Iterator<Item = (&str, &WeightedPattern)> {
        self.intents.iter().flat_map(|li| {
            li.keywords
                .enhanced_patterns
                .iter()
                .map(move |p| (li.locale.as_str(), p))
        })
    }

    /// Match the message against the keyword routes of the active locale.
    ///
    /// Scenarios are visited in key order and the first containing phrase
    /// wins.
    pub fn route_keyword(&self, message: &str) -> Option<RoutedPrompt> {
        let lowered = normalize(message);
        for config in self.scenarios.values() {
            for route in &config.keywords {
                let hit = route
                    .key
                    .iter()
                    .map(|k| normalize(k))
                    .find(|k| !k.is_empty() && lowered.contains(k.as_str()));
                if let Some(matched) = hit {
                    let prompt = route
                        .new_human_prompt
                        .as_deref()
                        .map(|p| p.replace("{message}", message))
                        .unwrap_or_else(|| message.to_owned());
                    return Some(RoutedPrompt {
                        scenario: route.scenario.clone(),
                        prompt,
                        matched,
                    });
                }
            }
        }
        None
    }
}

fn merged_intents<'a>(scenarios: impl Iterator<Item = &'a ScenarioConfig>) -> IntentKeywords {
    let mut merged = IntentKeywords::default();
    for scenario in scenarios {
        if let Some(flow) = &scenario.flow_creation {
            merged.merge(&flow.intent_keywords);
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Reloadable holder of the current [`LocaleSnapshot`].
///
/// The store is the only writer of the pattern tables.  It is `Send + Sync`
/// and meant to be shared behind an `Arc`.
pub struct LocaleStore {
    source: Arc<dyn LocaleSource>,
    current: RwLock<Arc<LocaleSnapshot>>,
    next_epoch: AtomicU64,
}

impl std::fmt::Debug for LocaleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("LocaleStore")
            .field("locale", &snapshot.locale())
            .field("epoch", &snapshot.epoch())
            .finish()
    }
}

impl LocaleStore {
    /// Load `locale` from `source` and create the store.
    pub fn new(source: Arc<dyn LocaleSource>, locale: &str) -> Result<Self> {
        let snapshot = LocaleSnapshot::build(source.as_ref(), locale, 0)?;
        Ok(Self {
            source,
            current: RwLock::new(Arc::new(snapshot)),
            next_epoch: AtomicU64::new(1),
        })
    }

    /// A store backed by the bundled locale files.
    pub fn bundled(locale: &str) -> Result<Self> {
        Self::new(Arc::new(StaticSource::bundled()?), locale)
    }

    /// The current snapshot.  Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<LocaleSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The active locale.
    pub fn locale(&self) -> String {
        self.snapshot().locale().to_owned()
    }

    /// Locales offered by the underlying source.
    pub fn available_locales(&self) -> Result<Vec<String>> {
        self.source.locales()
    }

    /// Re-read every pattern file for the active locale and swap the
    /// snapshot.  On failure the previous snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<LocaleSnapshot>> {
        let locale = self.locale();
        self.rebuild(&locale)
    }

    /// Switch to another locale.  On failure the previous snapshot stays in
    /// place.
    pub fn set_locale(&self, locale: &str) -> Result<Arc<LocaleSnapshot>> {
        self.rebuild(locale)
    }

    fn rebuild(&self, locale: &str) -> Result<Arc<LocaleSnapshot>> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let snapshot = Arc::new(LocaleSnapshot::build(self.source.as_ref(), locale, epoch)?);

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // A slower concurrent rebuild must not overwrite a newer snapshot.
        if guard.epoch() < snapshot.epoch() {
            *guard = Arc::clone(&snapshot);
        }
        Ok(Arc::clone(&guard))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const EN: &str = r#"{
        "scenarios": {
            "general": { "systemPrompt": "You are helpful. Language: {{lang}}", "dynamicInputs": ["lang"] },
            "development": {
                "systemPrompt": "Build flows.",
                "tools": ["get_flows"],
                "keywords": [
                    { "key": ["debug my flow"], "scenario": "development", "newHumanPrompt": "Debug: {message}" }
                ],
                "flowCreation": { "intentKeywords": {
                    "createVerbs": ["create"], "flowNouns": ["flow"],
                    "queryKeywords": ["show current flow"]
                } }
            }
        }
    }"#;

    const ZH: &str = r#"{
        "scenarios": {
            "general": { "systemPrompt": "你是助手" },
            "development": {
                "systemPrompt": "构建流程",
                "flowCreation": { "intentKeywords": {
                    "createVerbs": ["创建"], "flowNouns": ["流程"],
                    "queryKeywords": ["查看当前流程"]
                } }
            }
        }
    }"#;

    fn source() -> Arc<dyn LocaleSource> {
        Arc::new(
            StaticSource::new()
                .with_json("en-US", EN)
                .unwrap()
                .with_json("zh-CN", ZH)
                .unwrap(),
        )
    }

    #[test]
    fn scenario_keys_are_filled() {
        let store = LocaleStore::new(source(), "en-US").unwrap();
        let snapshot = store.snapshot();
        let dev = snapshot.require_scenario("development").unwrap();
        assert_eq!(dev.key, "development");
        assert_eq!(dev.tools.as_deref(), Some(&["get_flows".to_string()][..]));
        assert!(snapshot.scenario("general").unwrap().tools.is_none());
    }

    #[test]
    fn query_keywords_aggregate_all_locales() {
        let store = LocaleStore::new(source(), "en-US").unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot.query_matcher().is_query("show current flow"));
        assert!(snapshot.query_matcher().is_query("查看当前流程"));
        assert_eq!(snapshot.intents()[0].locale, "en-US");
        assert_eq!(snapshot.intents().len(), 2);
    }

    #[test]
    fn set_locale_swaps_whole_snapshot() {
        let store = LocaleStore::new(source(), "en-US").unwrap();
        let before = store.snapshot();
        let after = store.set_locale("zh-CN").unwrap();

        assert_eq!(after.locale(), "zh-CN");
        assert!(after.epoch() > before.epoch());
        assert_eq!(
            after.scenario("general").unwrap().system_prompt,
            "你是助手"
        );
        // The old snapshot is untouched.
        assert_eq!(before.locale(), "en-US");
    }

    #[test]
    fn unknown_locale_keeps_previous_snapshot() {
        let store = LocaleStore::new(source(), "en-US").unwrap();
        let err = store.set_locale("fr-FR").unwrap_err();
        assert!(matches!(err, KernelError::UnknownLocale { .. }));
        assert_eq!(store.locale(), "en-US");
    }

    #[test]
    fn missing_scenario_is_a_configuration_error() {
        let store = LocaleStore::new(source(), "en-US").unwrap();
        let err = store.snapshot().require_scenario("management").unwrap_err();
        assert!(matches!(err, KernelError::ScenarioNotFound { .. }));
    }

    #[test]
    fn keyword_route_rewrites_prompt() {
        let store = LocaleStore::new(source(), "en-US").unwrap();
        let routed = store
            .snapshot()
            .route_keyword("Please debug my flow now")
            .unwrap();
        assert_eq!(routed.scenario, "development");
        assert_eq!(routed.prompt, "Debug: Please debug my flow now");
        assert!(store.snapshot().route_keyword("hello").is_none());
    }

    #[test]
    fn bundled_locales_parse() {
        let store = LocaleStore::bundled("en-US").unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot.scenario(GENERAL_SCENARIO).is_some());
        assert!(!snapshot.query_matcher().is_empty());
        assert!(store.available_locales().unwrap().contains(&"zh-CN".to_string()));
    }

    #[test]
    fn directory_source_reads_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("en-US.json"), EN).unwrap();
        std::fs::write(
            dir.path().join("de-DE.toml"),
            "[scenarios.general]\nsystemPrompt = \"Hallo\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.locales().unwrap(), vec!["de-DE", "en-US"]);

        let de = source.load("de-DE").unwrap();
        assert_eq!(de.scenarios["general"].system_prompt, "Hallo");

        let err = source.load("fr-FR").unwrap_err();
        assert!(matches!(err, KernelError::ConfigMissing { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("en-US.json"), "{ not json").unwrap();
        let err = DirectorySource::new(dir.path()).load("en-US").unwrap_err();
        assert!(matches!(err, KernelError::ConfigParse { .. }));
    }
}
