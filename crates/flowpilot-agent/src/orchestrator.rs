//! Agent orchestrator.
//!
//! Drives one conversational turn through the state machine
//!
//! ```text
//! START -> { DIRECT_TOOL | AGENT_TOOLCALL | PURE_LLM } -> EXPLAIN? -> FINISH | ERROR
//! ```
//!
//! and owns the agent cache.  The cache is tied to the epoch of the locale
//! snapshot it was filled under: when the pattern tables are reloaded or the
//! locale changes, the whole cache is replaced with an empty one, so an
//! agent built from an old scenario configuration is never reused.
//!
//! Every turn is delivered through a [`StreamMultiplexer`], which guarantees
//! one `start` and one terminal event however the turn ends.

use std::sync::{Arc, PoisonError, RwLock};

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use flowpilot_kernel::{LocaleSnapshot, LocaleStore, ScenarioConfig, ToolTriggerDetector};

use crate::agent::{Agent, AgentKey, RunLimits};
use crate::config::OrchestratorConfig;
use crate::context::ContextData;
use crate::error::{AgentError, Result};
use crate::llm::model::{ModelConfig, ModelFactory};
use crate::llm::types::{Message, Role};
use crate::prompt::{self, Language};
use crate::store::ConversationStore;
use crate::stream::{AgentStep, CanonicalEvent, FinishReason, StreamMultiplexer, normalize_tool_content};
use crate::tools::{ScenarioToolSelector, ToolDescriptor, truncate_with_marker};

const AGENT_CACHE_CAPACITY: u64 = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The path a turn took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// An explicit "use <tool> ... id X" instruction ran the tool directly.
    DirectTool,
    /// A slash command handed the turn to the tool-calling agent.
    AgentToolcall,
    /// Plain generation without tools.
    PureLlm,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::DirectTool => "direct_tool",
            Self::AgentToolcall => "agent_toolcall",
            Self::PureLlm => "pure_llm",
        })
    }
}

/// What happened in a turn, for callers that do not consume the events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnSummary {
    /// Route taken, if routing got that far.
    pub route: Option<Route>,
    /// Scenario the turn ran in (after keyword routing).
    pub scenario: String,
    /// All text streamed to the caller.
    pub text: String,
    /// Number of `tool_call` events.
    pub tool_calls: usize,
    /// Set when the turn finished successfully.
    pub finish_reason: Option<FinishReason>,
    /// Set when the turn failed.
    pub error: Option<String>,
}

/// An agent plus the tools it may use for one turn.
#[derive(Debug, Clone)]
pub struct TurnAgent {
    /// The cached agent.
    pub agent: Arc<Agent>,
    /// Tools resolved for the scenario and the caller's context.
    pub tools: Vec<ToolDescriptor>,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct AgentCache {
    epoch: u64,
    agents: Cache<AgentKey, Arc<Agent>>,
}

impl AgentCache {
    fn new(epoch: u64) -> Arc<Self> {
        Arc::new(Self {
            epoch,
            agents: Cache::builder().max_capacity(AGENT_CACHE_CAPACITY).build(),
        })
    }
}

struct TurnState {
    scenario: String,
    route: Option<Route>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Builds and caches agents, and runs streaming turns.
pub struct AgentOrchestrator {
    locales: Arc<LocaleStore>,
    selector: ScenarioToolSelector,
    factory: Arc<dyn ModelFactory>,
    store: Option<Arc<dyn ConversationStore>>,
    trigger: ToolTriggerDetector,
    config: OrchestratorConfig,
    cache: RwLock<Arc<AgentCache>>,
}

impl std::fmt::Debug for AgentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOrchestrator")
            .field("locale", &self.locales.locale())
            .field("selector", &self.selector)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentOrchestrator {
    /// Create an orchestrator with default limits and no conversation store.
    pub fn new(
        locales: Arc<LocaleStore>,
        selector: ScenarioToolSelector,
        factory: Arc<dyn ModelFactory>,
    ) -> Self {
        let epoch = locales.snapshot().epoch();
        Self {
            locales,
            selector,
            factory,
            store: None,
            trigger: ToolTriggerDetector::new(),
            config: OrchestratorConfig::default(),
            cache: RwLock::new(AgentCache::new(epoch)),
        }
    }

    /// Builder: persist turns and replay history through `store`.
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builder: limits and sampling defaults.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: a trigger detector with extra aliases.
    pub fn with_trigger_detector(mut self, trigger: ToolTriggerDetector) -> Self {
        self.trigger = trigger;
        self
    }

    /// The locale store.
    pub fn locales(&self) -> &Arc<LocaleStore> {
        &self.locales
    }

    /// The tool selector.
    pub fn selector(&self) -> &ScenarioToolSelector {
        &self.selector
    }

    /// The active limits.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // -- Cache --------------------------------------------------------------

    fn cache_for(&self, epoch: u64) -> Arc<AgentCache> {
        {
            let guard = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if guard.epoch == epoch {
                return Arc::clone(&guard);
            }
        }
        let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if guard.epoch < epoch {
            info!(old_epoch = guard.epoch, new_epoch = epoch, "locale changed, dropping agent cache");
            *guard = AgentCache::new(epoch);
        } else if guard.epoch > epoch {
            // A turn that started on an older snapshot must not fill the new cache.
            return AgentCache::new(epoch);
        }
        Arc::clone(&guard)
    }

    fn reset_cache(&self, epoch: u64) {
        let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if guard.epoch <= epoch {
            *guard = AgentCache::new(epoch);
            info!(epoch, "agent cache invalidated");
        }
    }

    /// Number of agents cached for the current locale snapshot.
    pub async fn cached_agents(&self) -> u64 {
        let epoch = self.locales.snapshot().epoch();
        let cache = Arc::clone(&self.cache.read().unwrap_or_else(PoisonError::into_inner));
        if cache.epoch != epoch {
            return 0;
        }
        cache.agents.run_pending_tasks().await;
        cache.agents.entry_count()
    }

    /// Re-read the pattern tables and drop every cached agent.
    pub fn reload(&self) -> Result<()> {
        let snapshot = self.locales.reload()?;
        self.reset_cache(snapshot.epoch());
        info!(locale = %snapshot.locale(), epoch = snapshot.epoch(), "pattern tables reloaded");
        Ok(())
    }

    /// Switch locale and drop every cached agent.
    pub fn update_locale(&self, locale: &str) -> Result<()> {
        let snapshot = self.locales.set_locale(locale)?;
        self.reset_cache(snapshot.epoch());
        info!(locale = %snapshot.locale(), epoch = snapshot.epoch(), "locale updated");
        Ok(())
    }

    // -- Agents -------------------------------------------------------------

    /// The agent for `scenario` and `model_config`, plus the tools bound to
    /// `ctx`.  Agents are cached by scenario, provider, model and
    /// credentials; tools are resolved per call.
    pub async fn get_or_create_agent(
        &self,
        scenario: &str,
        model_config: &ModelConfig,
        ctx: &ContextData,
    ) -> Result<TurnAgent> {
        let snapshot = self.locales.snapshot();
        let config = scenario_config(&snapshot, scenario)?;
        let agent = self.agent_for(&snapshot, config, model_config).await?;
        let tools = self.selector.tools_for(scenario, Some(config), ctx);
        Ok(TurnAgent { agent, tools })
    }

    async fn agent_for(
        &self,
        snapshot: &LocaleSnapshot,
        config: &ScenarioConfig,
        model_config: &ModelConfig,
    ) -> Result<Arc<Agent>> {
        let cache = self.cache_for(snapshot.epoch());
        let key = AgentKey::new(&config.key, model_config);

        if let Some(agent) = cache.agents.get(&key).await {
            debug!(scenario = %key.scenario, model = %key.model, "agent cache hit");
            return Ok(agent);
        }

        debug!(scenario = %key.scenario, model = %key.model, "agent cache miss");
        let model = self.factory.build(model_config)?;
        let agent = Arc::new(
            Agent::new(key.clone(), model, config.system_prompt.clone()).with_sampling(
                model_config.temperature.or(Some(self.config.temperature)),
                model_config.max_tokens.or(Some(self.config.max_tokens)),
            ),
        );
        cache.agents.insert(key, Arc::clone(&agent)).await;
        Ok(agent)
    }

    // -- Turns --------------------------------------------------------------

    /// Run one turn, streaming canonical events into `on_event`.
    ///
    /// `on_event` receives exactly one `start` first and exactly one
    /// terminal event (`finish` or `error`) last.  Errors never escape;
    /// they become the terminal `error` event and are also reported in the
    /// returned summary.
    pub async fn run_turn_streaming(
        &self,
        scenario: &str,
        message: &str,
        model_config: &ModelConfig,
        session_id: &str,
        ctx: &ContextData,
        on_event: &mut (dyn FnMut(CanonicalEvent) + Send),
    ) -> TurnSummary {
        let mut mux = StreamMultiplexer::new(on_event);
        mux.start();

        let mut state = TurnState {
            scenario: scenario.to_owned(),
            route: None,
        };

        let outcome = tokio::time::timeout(
            self.config.turn_timeout(),
            self.drive(&mut mux, &mut state, message, model_config, session_id, ctx),
        )
        .await;

        let (finish_reason, error) = match outcome {
            Ok(Ok(reason)) => {
                mux.finish(reason);
                (Some(reason), None)
            }
            Ok(Err(e)) => {
                warn!(scenario = %state.scenario, error = %e, "turn failed");
                let message = e.to_string();
                mux.fail(message.clone());
                (None, Some(message))
            }
            Err(_) => {
                warn!(
                    scenario = %state.scenario,
                    timeout_secs = self.config.turn_timeout_secs,
                    "turn hit the wall-clock ceiling"
                );
                mux.finish(FinishReason::Timeout);
                (Some(FinishReason::Timeout), None)
            }
        };

        let summary = TurnSummary {
            route: state.route,
            scenario: state.scenario,
            text: mux.text().to_owned(),
            tool_calls: mux.tool_call_count(),
            finish_reason,
            error,
        };
        drop(mux);

        if summary.error.is_none() {
            self.persist(session_id, message, &summary).await;
        }
        info!(
            scenario = %summary.scenario,
            route = ?summary.route,
            tool_calls = summary.tool_calls,
            finish = ?summary.finish_reason,
            "turn complete"
        );
        summary
    }

    async fn drive(
        &self,
        mux: &mut StreamMultiplexer<'_>,
        state: &mut TurnState,
        message: &str,
        model_config: &ModelConfig,
        session_id: &str,
        ctx: &ContextData,
    ) -> Result<FinishReason> {
        let snapshot = self.locales.snapshot();

        let prompt = match snapshot.route_keyword(message) {
            Some(routed) => {
                info!(from = %state.scenario, to = %routed.scenario, matched = %routed.matched, "keyword route");
                state.scenario = routed.scenario;
                routed.prompt
            }
            None => message.to_owned(),
        };

        let config = scenario_config(&snapshot, &state.scenario)?;
        let agent = self.agent_for(&snapshot, config, model_config).await?;
        let language = Language::resolve(ctx, message);

        let mut messages = vec![Message::system(agent.system_prompt(ctx))];
        messages.extend(self.history(session_id).await);

        let trigger = self.trigger.detect(message);
        match trigger.tool_name.filter(|_| trigger.is_tool_trigger) {
            Some(tool_name) if trigger.direct_execution => {
                state.route = Some(Route::DirectTool);
                info!(scenario = %state.scenario, tool = %tool_name, route = "direct_tool", "routing turn");
                messages.push(Message::user(prompt.clone()));

                let tools = self.selector.tools_for(&state.scenario, Some(config), ctx);
                let tool = tools
                    .iter()
                    .find(|t| t.name() == tool_name)
                    .ok_or_else(|| AgentError::ToolNotFound {
                        tool_name: tool_name.clone(),
                    })?;
                let args = direct_arguments(tool.parameter_schema(), trigger.tool_args.as_deref().unwrap_or(""));

                mux.step(AgentStep::ToolDecision {
                    name: tool_name.clone(),
                    args: args.clone(),
                });
                let output = tool.invoke(args).await?;
                let (content, truncated) =
                    truncate_with_marker(&normalize_tool_content(&output), self.config.tool_result_max_bytes);
                if truncated {
                    debug!(tool = %tool_name, "direct tool result truncated");
                }
                mux.step(AgentStep::ToolCompletion {
                    name: tool_name.clone(),
                    output: Value::String(content.clone()),
                });

                self.explain(mux, &agent, messages, language, &prompt, &[(tool_name, content)])
                    .await?;
                Ok(FinishReason::Stop)
            }
            Some(tool_name) => {
                state.route = Some(Route::AgentToolcall);
                info!(scenario = %state.scenario, tool = %tool_name, route = "agent_toolcall", "routing turn");

                let instruction = prompt::tool_instruction(&tool_name, trigger.tool_args.as_deref(), &prompt);
                let mut run_messages = messages.clone();
                run_messages.push(Message::user(instruction));

                let tools = self.selector.tools_for(&state.scenario, Some(config), ctx);
                let limits = RunLimits {
                    max_tool_cycles: self.config.max_tool_cycles,
                    tool_result_max_bytes: self.config.tool_result_max_bytes,
                };
                let run = agent
                    .run(run_messages, &tools, limits, &mut |step| mux.step(step))
                    .await?;

                if !run.tool_outcomes.is_empty() {
                    let results: Vec<(String, String)> = run
                        .tool_outcomes
                        .into_iter()
                        .map(|o| (o.name, o.content))
                        .collect();
                    messages.push(Message::user(prompt.clone()));
                    self.explain(mux, &agent, messages, language, &prompt, &results)
                        .await?;
                }
                Ok(run.finish)
            }
            None => {
                state.route = Some(Route::PureLlm);
                info!(scenario = %state.scenario, route = "pure_llm", "routing turn");
                messages.push(Message::user(prompt));
                agent.generate(messages, &mut |t| mux.token(t)).await?;
                Ok(FinishReason::Stop)
            }
        }
    }

    /// The explanation pass over raw tool output.
    async fn explain(
        &self,
        mux: &mut StreamMultiplexer<'_>,
        agent: &Agent,
        mut messages: Vec<Message>,
        language: Language,
        question: &str,
        results: &[(String, String)],
    ) -> Result<()> {
        debug!(results = results.len(), ?language, "explaining tool output");
        messages.push(Message::user(prompt::explain_prompt(language, question, results)));
        if !mux.text().is_empty() {
            mux.token("\n\n");
        }
        agent.generate(messages, &mut |t| mux.token(t)).await?;
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Vec<Message> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.get_session_context(session_id).await {
            Ok(history) => {
                let skip = history.len().saturating_sub(self.config.history_limit);
                history.into_iter().skip(skip).collect()
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "failed to load session history");
                Vec::new()
            }
        }
    }

    async fn persist(&self, session_id: &str, message: &str, summary: &TurnSummary) {
        let Some(store) = &self.store else {
            return;
        };
        let metadata = json!({
            "route": summary.route,
            "toolCalls": summary.tool_calls,
            "finishReason": summary.finish_reason,
        });
        let turns = [(Role::User, message), (Role::Assistant, summary.text.as_str())];
        for (role, content) in turns {
            if let Err(e) = store
                .append_turn(session_id, role, content, &summary.scenario, Some(metadata.clone()))
                .await
            {
                warn!(session = %session_id, error = %e, "failed to persist turn");
            }
        }
    }
}

fn scenario_config<'a>(snapshot: &'a LocaleSnapshot, scenario: &str) -> Result<&'a ScenarioConfig> {
    snapshot
        .scenario(scenario)
        .ok_or_else(|| AgentError::Configuration {
            reason: format!(
                "scenario `{scenario}` is not configured for locale `{}`",
                snapshot.locale()
            ),
        })
}

/// Map a trigger's raw argument text onto a tool's parameter object.
///
/// A JSON object is used as-is.  Any other text fills the first required
/// property (or, without required properties, the first declared one);
/// array properties take a comma separated list.  Empty text gives `{}`.
pub fn direct_arguments(schema: &Value, raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return json!({});
    }
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(raw) {
        return value;
    }

    let properties = schema["properties"].as_object();
    let target = schema["required"]
        .as_array()
        .and_then(|r| r.iter().find_map(Value::as_str))
        .or_else(|| properties.and_then(|p| p.keys().next().map(String::as_str)));
    let Some(target) = target else {
        return json!({});
    };

    let kind = properties
        .and_then(|p| p.get(target))
        .and_then(|p| p["type"].as_str())
        .unwrap_or("string");
    let value = match kind {
        "array" => Value::Array(
            raw.split([',', '，', '、'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_owned()))
                .collect(),
        ),
        "integer" => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_owned())),
        "number" => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_owned())),
        _ => Value::String(raw.to_owned()),
    };

    let mut args = Map::new();
    args.insert(target.to_owned(), value);
    Value::Object(args)
}
