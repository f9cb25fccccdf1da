//! End-to-end tests for the turn state machine.
//!
//! Every test drives `AgentOrchestrator::run_turn_streaming` with the bundled
//! locale tables, the real built-in tools over an in-memory flows document,
//! and a scripted in-process model.  No network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use flowpilot_agent::tools::builtin;
use flowpilot_agent::{
    AgentError, AgentOrchestrator, BuiltinDeps, CanonicalEvent, ChatModel, ChatRequest,
    ChunkStream, ContextData, ConversationStore, FinishReason, FlowsDocument, InMemoryStore,
    ModelChunk, ModelConfig, ModelFactory, OrchestratorConfig, ProviderFactory, Role, Route,
    ScenarioToolSelector, Tool, ToolCall, ToolRegistry, TurnSummary,
};
use flowpilot_kernel::LocaleStore;

// ── scripted model ──────────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<VecDeque<Vec<ModelChunk>>>,
    requests: Mutex<Vec<ChatRequest>>,
    stall: bool,
}

impl ScriptedModel {
    fn new(responses: Vec<Vec<ModelChunk>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn stalling() -> Arc<Self> {
        Arc::new(Self {
            stall: true,
            ..Self::default()
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }

    async fn generate_stream(&self, request: ChatRequest) -> flowpilot_agent::Result<ChunkStream> {
        self.requests.lock().unwrap().push(request);
        if self.stall {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let chunks = self.responses.lock().unwrap().pop_front().unwrap_or_default();
        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

struct ScriptedFactory {
    model: Arc<ScriptedModel>,
    builds: AtomicUsize,
}

impl ScriptedFactory {
    fn new(model: Arc<ScriptedModel>) -> Arc<Self> {
        Arc::new(Self {
            model,
            builds: AtomicUsize::new(0),
        })
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ModelFactory for ScriptedFactory {
    fn build(&self, _config: &ModelConfig) -> flowpilot_agent::Result<Arc<dyn ChatModel>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.model.clone())
    }
}

// ── harness ─────────────────────────────────────────────────────────────────

struct Harness {
    orchestrator: AgentOrchestrator,
    store: Arc<InMemoryStore>,
}

fn flows() -> FlowsDocument {
    FlowsDocument::from_value(json!([
        { "id": "t1", "type": "tab", "label": "Greenhouse" },
        { "id": "t2", "type": "tab", "label": "Lights" },
        { "id": "n1", "type": "mqtt in", "z": "t1", "topic": "sensors/temp" },
        { "id": "n2", "type": "debug", "z": "t1" }
    ]))
    .unwrap()
}

fn harness_with(factory: Arc<dyn ModelFactory>, config: OrchestratorConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new().with_templates(InMemoryStore::default_templates()));
    let deps = BuiltinDeps {
        host: Arc::new(flows()),
        conversations: store.clone(),
        preferences: store.clone(),
        templates: store.clone(),
    };
    let registry = Arc::new(ToolRegistry::new());
    let factories = builtin::install(&registry, &deps).unwrap();
    let selector = ScenarioToolSelector::new(registry).with_contextual_all(factories);
    let locales = Arc::new(LocaleStore::bundled("en-US").unwrap());

    let orchestrator = AgentOrchestrator::new(locales, selector, factory)
        .with_store(store.clone())
        .with_config(config);
    Harness { orchestrator, store }
}

fn harness(factory: Arc<dyn ModelFactory>) -> Harness {
    harness_with(factory, OrchestratorConfig::default())
}

fn model_config() -> ModelConfig {
    ModelConfig::new("scripted", "scripted-1")
}

async fn turn(
    h: &Harness,
    scenario: &str,
    message: &str,
    ctx: &ContextData,
) -> (Vec<CanonicalEvent>, TurnSummary) {
    let mut events = Vec::new();
    let summary = h
        .orchestrator
        .run_turn_streaming(
            scenario,
            message,
            &model_config(),
            "session-1",
            ctx,
            &mut |e| events.push(e),
        )
        .await;
    (events, summary)
}

fn assert_bracketed(events: &[CanonicalEvent]) {
    assert_eq!(events.first(), Some(&CanonicalEvent::Start), "{events:?}");
    assert_eq!(
        events.iter().filter(|e| **e == CanonicalEvent::Start).count(),
        1,
        "{events:?}"
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1, "{events:?}");
    assert!(events.last().is_some_and(CanonicalEvent::is_terminal), "{events:?}");
}

fn text(s: &str) -> ModelChunk {
    ModelChunk::Text(s.into())
}

fn tool_call(id: &str, name: &str) -> ModelChunk {
    ModelChunk::ToolCall(ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: json!({}),
    })
}

// ── pure llm ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pure_llm_turn_streams_text_and_persists() {
    let model = ScriptedModel::new(vec![vec![text("Hi "), text("there.")]]);
    let h = harness(ScriptedFactory::new(model.clone()));

    let (events, summary) = turn(&h, "general", "hello", &ContextData::default()).await;

    assert_bracketed(&events);
    assert_eq!(
        events,
        vec![
            CanonicalEvent::Start,
            CanonicalEvent::TextDelta { text: "Hi ".into() },
            CanonicalEvent::TextDelta { text: "there.".into() },
            CanonicalEvent::Finish {
                reason: FinishReason::Stop
            },
        ]
    );
    assert_eq!(summary.route, Some(Route::PureLlm));
    assert_eq!(summary.text, "Hi there.");

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].tools.is_empty());
    assert_eq!(requests[0].messages[0].role, Role::System);

    let history = h.store.get_session_context("session-1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "hello");
    assert_eq!(history[1].content, "Hi there.");
}

#[tokio::test]
async fn keyword_route_retargets_scenario_and_prompt() {
    let model = ScriptedModel::new(vec![vec![text("Step 1")]]);
    let h = harness(ScriptedFactory::new(model.clone()));

    let (_, summary) = turn(&h, "general", "please teach me Node-RED", &ContextData::default()).await;

    assert_eq!(summary.scenario, "learning");
    let requests = model.requests();
    let last = requests[0].messages.last().unwrap();
    assert!(last.content.starts_with("Give me a step-by-step learning path"));
    assert!(last.content.ends_with("please teach me Node-RED"));
}

#[tokio::test]
async fn history_is_windowed() {
    let model = ScriptedModel::new(vec![vec![text("ok")]]);
    let config = OrchestratorConfig {
        history_limit: 2,
        ..OrchestratorConfig::default()
    };
    let h = harness_with(ScriptedFactory::new(model.clone()), config);
    for i in 0..5 {
        h.store
            .append_turn("session-1", Role::User, &format!("old {i}"), "general", None)
            .await
            .unwrap();
    }

    turn(&h, "general", "new", &ContextData::default()).await;

    let messages = &model.requests()[0].messages;
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].content, "old 3");
    assert_eq!(messages[2].content, "old 4");
}

#[tokio::test]
async fn system_prompt_receives_context() {
    let model = ScriptedModel::new(vec![vec![text("ok")]]);
    let h = harness(ScriptedFactory::new(model.clone()));
    let ctx = ContextData::default().with_flow("t1").with_language("en-US");

    turn(&h, "development", "what is wrong here?", &ctx).await;

    let system = &model.requests()[0].messages[0].content;
    assert!(system.contains("t1"), "{system}");
    assert!(!system.contains("{{"), "{system}");
}

// ── agent tool calling ──────────────────────────────────────────────────────

#[tokio::test]
async fn slash_command_runs_agent_then_explains() {
    let model = ScriptedModel::new(vec![
        vec![tool_call("c1", "get_flows")],
        vec![text("Two flows.")],
        vec![text("They monitor a greenhouse.")],
    ]);
    let h = harness(ScriptedFactory::new(model.clone()));

    let (events, summary) = turn(&h, "development", "/tool:get_flows", &ContextData::default()).await;

    assert_bracketed(&events);
    assert_eq!(summary.route, Some(Route::AgentToolcall));
    assert_eq!(summary.tool_calls, 1);
    assert_eq!(summary.finish_reason, Some(FinishReason::Stop));

    assert!(matches!(&events[1], CanonicalEvent::ToolCall { name, .. } if name == "get_flows"));
    match &events[2] {
        CanonicalEvent::ToolResult { name, content } => {
            assert_eq!(name, "get_flows");
            assert!(content.contains("Greenhouse"));
        }
        other => panic!("expected tool_result, got {other:?}"),
    }
    assert_eq!(summary.text, "Two flows.\n\nThey monitor a greenhouse.");

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests[0].tools.is_empty());
    assert!(requests[0].messages.last().unwrap().content.contains("`get_flows`"));
    let explain = requests[2].messages.last().unwrap();
    assert!(explain.content.contains("[get_flows]"));
    assert!(explain.content.contains("Caveats"));
    assert!(requests[2].tools.is_empty());
}

#[tokio::test]
async fn failing_tool_still_allows_explanation() {
    let model = ScriptedModel::new(vec![
        vec![tool_call("c1", "get_flow")],
        vec![text("Could not read it.")],
        vec![text("No flow is selected.")],
    ]);
    let h = harness(ScriptedFactory::new(model.clone()));

    let (events, summary) = turn(&h, "development", "/tool:get_flow", &ContextData::default()).await;

    assert_bracketed(&events);
    assert_eq!(summary.finish_reason, Some(FinishReason::Stop));
    assert!(events.iter().any(|e| matches!(
        e,
        CanonicalEvent::ToolResult { content, .. } if content.starts_with("Error:")
    )));
    assert_eq!(model.requests().len(), 3);
}

#[tokio::test]
async fn tool_cycle_limit_finishes_with_partial_answer() {
    let model = ScriptedModel::new(vec![
        vec![tool_call("c1", "get_flows")],
        vec![tool_call("c2", "get_flows")],
        vec![text("Summary of what was found.")],
    ]);
    let config = OrchestratorConfig {
        max_tool_cycles: 2,
        ..OrchestratorConfig::default()
    };
    let h = harness_with(ScriptedFactory::new(model.clone()), config);

    let (events, summary) = turn(&h, "development", "/tool:get_flows", &ContextData::default()).await;

    assert_bracketed(&events);
    assert_eq!(
        events.last(),
        Some(&CanonicalEvent::Finish {
            reason: FinishReason::ToolLimit
        })
    );
    assert_eq!(summary.tool_calls, 2);
    assert_eq!(summary.text, "Summary of what was found.");
}

struct SlowReader;

#[async_trait]
impl Tool for SlowReader {
    fn name(&self) -> &str {
        "read_registers"
    }

    fn description(&self) -> &str {
        "Read PLC holding registers"
    }

    fn parameters(&self) -> serde_json::Value {
        json!({ "type": "object" })
    }

    async fn invoke(&self, _args: serde_json::Value) -> flowpilot_agent::Result<serde_json::Value> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!("40001=215"))
    }
}

#[tokio::test]
async fn tool_results_stream_in_completion_order() {
    let model = ScriptedModel::new(vec![
        vec![tool_call("c1", "read_registers"), tool_call("c2", "get_flows")],
        vec![text("Read both.")],
        vec![text("Register 40001 holds 21.5 C.")],
    ]);
    let h = harness(ScriptedFactory::new(model.clone()));
    h.orchestrator
        .selector()
        .registry()
        .register(Arc::new(SlowReader))
        .unwrap();

    let (events, summary) = turn(&h, "integration", "/tool:read_registers", &ContextData::default()).await;

    assert_bracketed(&events);
    assert_eq!(summary.tool_calls, 2);
    let calls: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CanonicalEvent::ToolCall { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    let results: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CanonicalEvent::ToolResult { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(calls, ["read_registers", "get_flows"]);
    assert_eq!(results, ["get_flows", "read_registers"]);

    // The model still sees results in request order.
    let second = &model.requests()[1].messages;
    let ids: Vec<_> = second.iter().filter_map(|m| m.tool_call_id.as_deref()).collect();
    assert_eq!(ids, ["c1", "c2"]);
}

// ── direct tool ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_tool_invokes_without_agent_then_explains() {
    let model = ScriptedModel::new(vec![vec![text("This flow reads temperatures.")]]);
    let h = harness(ScriptedFactory::new(model.clone()));

    let (events, summary) = turn(
        &h,
        "development",
        "Please use get_flow for id \"t1\" and explain it",
        &ContextData::default(),
    )
    .await;

    assert_bracketed(&events);
    assert_eq!(summary.route, Some(Route::DirectTool));
    assert_eq!(
        events[1],
        CanonicalEvent::ToolCall {
            name: "get_flow".into(),
            args: json!({ "id": "t1" })
        }
    );
    assert!(matches!(&events[2], CanonicalEvent::ToolResult { content, .. } if content.contains("sensors/temp")));
    assert_eq!(summary.text, "This flow reads temperatures.");

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].messages.last().unwrap().content.contains("[get_flow]"));
}

#[tokio::test]
async fn direct_tool_failure_is_terminal_without_explanation() {
    let model = ScriptedModel::new(vec![vec![text("should not be used")]]);
    let h = harness(ScriptedFactory::new(model.clone()));

    let (events, summary) = turn(
        &h,
        "development",
        "Please use get_flow for id \"missing\" and explain it",
        &ContextData::default(),
    )
    .await;

    assert_bracketed(&events);
    assert!(matches!(events.last(), Some(CanonicalEvent::Error { message }) if message.contains("missing")));
    assert!(summary.error.is_some());
    assert!(model.requests().is_empty());
    assert_eq!(h.store.session_len("session-1"), 0);
}

// ── failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_provider_is_a_terminal_error() {
    let h = harness(Arc::new(ProviderFactory::new()));
    let mut events = Vec::new();
    let summary = h
        .orchestrator
        .run_turn_streaming(
            "general",
            "hello",
            &ModelConfig::new("carrier-pigeon", "v1"),
            "s",
            &ContextData::default(),
            &mut |e| events.push(e),
        )
        .await;

    assert_bracketed(&events);
    assert_eq!(events.len(), 2);
    assert!(summary.error.unwrap().contains("carrier-pigeon"));
    assert_eq!(h.orchestrator.cached_agents().await, 0);
}

#[tokio::test]
async fn unknown_scenario_is_a_terminal_error() {
    let model = ScriptedModel::new(vec![]);
    let h = harness(ScriptedFactory::new(model.clone()));

    let (events, summary) = turn(&h, "astrology", "hello", &ContextData::default()).await;

    assert_bracketed(&events);
    assert!(summary.error.unwrap().contains("astrology"));
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn wall_clock_ceiling_finishes_with_timeout() {
    let model = ScriptedModel::stalling();
    let config = OrchestratorConfig {
        turn_timeout_secs: 1,
        ..OrchestratorConfig::default()
    };
    let h = harness_with(ScriptedFactory::new(model), config);

    let (events, summary) = turn(&h, "general", "hello", &ContextData::default()).await;

    assert_bracketed(&events);
    assert_eq!(summary.finish_reason, Some(FinishReason::Timeout));
}

// ── agent cache ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn agents_are_cached_until_locale_changes() {
    let model = ScriptedModel::new(vec![]);
    let factory = ScriptedFactory::new(model);
    let h = harness(factory.clone());
    let ctx = ContextData::default();

    h.orchestrator
        .get_or_create_agent("development", &model_config(), &ctx)
        .await
        .unwrap();
    h.orchestrator
        .get_or_create_agent("development", &model_config(), &ctx)
        .await
        .unwrap();
    assert_eq!(factory.builds(), 1);
    assert_eq!(h.orchestrator.cached_agents().await, 1);

    h.orchestrator.update_locale("zh-CN").unwrap();
    assert_eq!(h.orchestrator.cached_agents().await, 0);

    let fresh = h
        .orchestrator
        .get_or_create_agent("development", &model_config(), &ctx)
        .await
        .unwrap();
    assert_eq!(factory.builds(), 2);
    assert!(fresh.agent.system_prompt(&ctx).chars().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c)));
}

#[tokio::test]
async fn reload_also_invalidates() {
    let factory = ScriptedFactory::new(ScriptedModel::new(vec![]));
    let h = harness(factory.clone());
    let ctx = ContextData::default();

    h.orchestrator
        .get_or_create_agent("general", &model_config(), &ctx)
        .await
        .unwrap();
    h.orchestrator.reload().unwrap();
    assert_eq!(h.orchestrator.cached_agents().await, 0);
    h.orchestrator
        .get_or_create_agent("general", &model_config(), &ctx)
        .await
        .unwrap();
    assert_eq!(factory.builds(), 2);
}

#[tokio::test]
async fn failed_construction_leaves_no_cache_entry() {
    let h = harness(Arc::new(ProviderFactory::new()));
    let err = h
        .orchestrator
        .get_or_create_agent(
            "general",
            &ModelConfig::new("openai", "gpt-4o"),
            &ContextData::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::MissingApiKey { .. }));
    assert_eq!(h.orchestrator.cached_agents().await, 0);
}

#[tokio::test]
async fn general_scenario_only_offers_memory_search() {
    let h = harness(ScriptedFactory::new(ScriptedModel::new(vec![])));
    let turn_agent = h
        .orchestrator
        .get_or_create_agent("general", &model_config(), &ContextData::default())
        .await
        .unwrap();
    let names: Vec<&str> = turn_agent.tools.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["search_memory"]);
}
