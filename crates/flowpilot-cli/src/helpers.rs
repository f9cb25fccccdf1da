//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, locale loading, model resolution, and
//! the editor/tool wiring shared by `tools` and `chat`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowpilot_agent::tools::builtin;
use flowpilot_agent::{
    BuiltinDeps, ContextData, FlowsDocument, InMemoryStore, ModelConfig, ScenarioToolSelector,
    ToolRegistry,
};
use flowpilot_kernel::{DirectorySource, LocaleStore};

use crate::cli::{EditorArgs, GlobalArgs, ModelArgs};

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber.  `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Locales
// ---------------------------------------------------------------------------

/// Load the locale store from `--locale-dir`, or the bundled tables.
pub fn load_locales(global: &GlobalArgs) -> Result<Arc<LocaleStore>> {
    let store = match &global.locale_dir {
        Some(dir) => {
            let source = Arc::new(DirectorySource::new(dir));
            LocaleStore::new(source, &global.locale)
                .with_context(|| format!("failed to load locale {} from {}", global.locale, dir.display()))?
        }
        None => LocaleStore::bundled(&global.locale)
            .with_context(|| format!("no bundled tables for locale {}", global.locale))?,
    };
    let snapshot = store.snapshot();
    info!(
        locale = snapshot.locale(),
        scenarios = snapshot.scenario_keys().count(),
        "locale tables loaded"
    );
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// Model resolution
// ---------------------------------------------------------------------------

const DEFAULT_PROVIDER: &str = "openai";

const DEFAULT_MODEL_OPENAI: &str = "gpt-4o-mini";
const DEFAULT_MODEL_DEEPSEEK: &str = "deepseek-chat";
const DEFAULT_MODEL_OPENROUTER: &str = "openai/gpt-4o-mini";
const DEFAULT_MODEL_SILICONFLOW: &str = "Qwen/Qwen2.5-72B-Instruct";
const DEFAULT_MODEL_OLLAMA: &str = "qwen2.5:latest";
const DEFAULT_MODEL_ANTHROPIC: &str = "claude-sonnet-4-20250514";

fn default_model(provider: &str) -> &'static str {
    match provider.trim().to_ascii_lowercase().as_str() {
        "deepseek" => DEFAULT_MODEL_DEEPSEEK,
        "openrouter" => DEFAULT_MODEL_OPENROUTER,
        "siliconflow" => DEFAULT_MODEL_SILICONFLOW,
        "ollama" => DEFAULT_MODEL_OLLAMA,
        "anthropic" => DEFAULT_MODEL_ANTHROPIC,
        _ => DEFAULT_MODEL_OPENAI,
    }
}

/// Resolve the model to use.
///
/// Each field comes from its flag, then from `FLOWPILOT_PROVIDER`,
/// `FLOWPILOT_MODEL`, `FLOWPILOT_API_KEY` and `FLOWPILOT_BASE_URL`.  The
/// provider is validated later, when the agent is built.
pub fn resolve_model_config(args: &ModelArgs) -> ModelConfig {
    let provider = args
        .provider
        .clone()
        .or_else(|| env_non_empty("FLOWPILOT_PROVIDER"))
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_owned());
    let model = args
        .model
        .clone()
        .or_else(|| env_non_empty("FLOWPILOT_MODEL"))
        .unwrap_or_else(|| default_model(&provider).to_owned());

    let mut config = ModelConfig::new(provider, model);
    if let Some(key) = args.api_key.clone().or_else(|| env_non_empty("FLOWPILOT_API_KEY")) {
        config = config.with_api_key(key);
    }
    if let Some(url) = args.base_url.clone().or_else(|| env_non_empty("FLOWPILOT_BASE_URL")) {
        config = config.with_base_url(url);
    }
    info!(provider = %config.provider, model = %config.model, "model resolved");
    config
}

/// Read an environment variable, treating empty values as unset.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Editor and tools
// ---------------------------------------------------------------------------

/// Load the flows export, or an empty editor when none is given.
pub async fn load_flows(path: Option<&Path>) -> Result<FlowsDocument> {
    match path {
        Some(path) => {
            let flows = FlowsDocument::load(path)
                .await
                .with_context(|| format!("failed to load flows from {}", path.display()))?;
            info!(path = %path.display(), entries = flows.len(), "flows loaded");
            Ok(flows)
        }
        None => {
            warn!("no --flows given, editor tools will see an empty workspace");
            Ok(FlowsDocument::from_value(serde_json::Value::Array(Vec::new()))?)
        }
    }
}

/// Register the built-in tools and build the scenario selector.
pub fn build_selector(flows: FlowsDocument, store: Arc<InMemoryStore>) -> Result<ScenarioToolSelector> {
    let registry = Arc::new(ToolRegistry::new());
    let deps = BuiltinDeps {
        host: Arc::new(flows),
        conversations: store.clone(),
        preferences: store.clone(),
        templates: store,
    };
    let factories = builtin::install(&registry, &deps).context("failed to register built-in tools")?;
    info!(tools = registry.len(), contextual = factories.len(), "tools registered");
    Ok(ScenarioToolSelector::new(registry).with_contextual_all(factories))
}

/// Per-turn editor context from the command line.
pub fn context_from(editor: &EditorArgs) -> ContextData {
    let mut ctx = ContextData::default().with_nodes(editor.nodes.iter().cloned());
    if let Some(flow) = &editor.flow {
        ctx = ctx.with_flow(flow.clone());
    }
    if let Some(lang) = &editor.lang {
        ctx = ctx.with_language(lang.clone());
    }
    ctx
}

/// A conversation store seeded with the default template catalogue.
pub fn new_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new().with_templates(InMemoryStore::default_templates()))
}
