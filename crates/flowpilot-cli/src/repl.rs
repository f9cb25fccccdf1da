//! `flowpilot chat`: one-shot turns and the interactive loop.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use flowpilot_agent::{
    AgentOrchestrator, CanonicalEvent, ContextData, ModelConfig, OrchestratorConfig,
    ProviderFactory,
};
use flowpilot_intent::ScenarioClassifier;
use flowpilot_kernel::{LocaleStore, LocaleWatcher};

use crate::cli::{EditorArgs, GlobalArgs, ModelArgs};
use crate::helpers::{build_selector, context_from, load_flows, load_locales, new_store, resolve_model_config};

/// Everything `chat` needs, built once per process.
pub struct ChatOptions {
    pub message: Option<String>,
    pub scenario: Option<String>,
    pub session: String,
    pub config: Option<PathBuf>,
    pub events: bool,
    pub watch: bool,
    pub editor: EditorArgs,
    pub model: ModelArgs,
}

struct ChatSession {
    orchestrator: AgentOrchestrator,
    classifier: ScenarioClassifier,
    model: ModelConfig,
    ctx: ContextData,
    scenario: Option<String>,
    session: String,
    events: bool,
}

pub async fn cmd_chat(global: &GlobalArgs, options: ChatOptions) -> Result<()> {
    let locales = load_locales(global)?;
    let _watcher = start_watcher(global, &options, &locales)?;

    let config = match &options.config {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };

    let store = new_store();
    let flows = load_flows(options.editor.flows.as_deref()).await?;
    let selector = build_selector(flows, store.clone())?;
    let factory = Arc::new(ProviderFactory::new().with_request_timeout(config.turn_timeout_secs));

    let orchestrator = AgentOrchestrator::new(locales, selector, factory)
        .with_store(store)
        .with_config(config);

    let session = ChatSession {
        orchestrator,
        classifier: ScenarioClassifier::new(),
        model: resolve_model_config(&options.model),
        ctx: context_from(&options.editor),
        scenario: options.scenario,
        session: options.session,
        events: options.events,
    };

    match options.message {
        Some(message) => {
            let ok = session.turn(&message).await;
            if ok {
                Ok(())
            } else {
                anyhow::bail!("turn failed")
            }
        }
        None => session.repl().await,
    }
}

fn start_watcher(
    global: &GlobalArgs,
    options: &ChatOptions,
    locales: &Arc<LocaleStore>,
) -> Result<Option<LocaleWatcher>> {
    if !options.watch {
        return Ok(None);
    }
    match &global.locale_dir {
        Some(dir) => {
            let watcher = LocaleWatcher::spawn(dir.clone(), Arc::clone(locales))
                .context("failed to watch locale directory")?;
            Ok(Some(watcher))
        }
        None => {
            warn!("--watch needs --locale-dir, hot reload disabled");
            Ok(None)
        }
    }
}

impl ChatSession {
    /// Run one turn and render its events.  Returns `false` when the turn
    /// ended in an error event.
    async fn turn(&self, message: &str) -> bool {
        let scenario = self
            .scenario
            .clone()
            .unwrap_or_else(|| self.classifier.classify(message).to_string());
        info!(scenario = %scenario, session = %self.session, "running turn");

        let events = self.events;
        let mut render = move |event: CanonicalEvent| render_event(&event, events);
        let summary = self
            .orchestrator
            .run_turn_streaming(&scenario, message, &self.model, &self.session, &self.ctx, &mut render)
            .await;
        summary.error.is_none()
    }

    async fn repl(&self) -> Result<()> {
        println!();
        println!("  FlowPilot v{}", env!("CARGO_PKG_VERSION"));
        println!("  Provider: {} ({})", self.model.provider, self.model.model);
        println!("  Locale: {}", self.orchestrator.locales().locale());
        println!("  Type a message, ':locale <id>' to switch locale, or 'quit' to exit.");
        println!();

        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            print!("> ");
            io::stdout().flush().ok();

            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) => {
                    println!();
                    info!("EOF received, exiting");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("  Error reading input: {e}");
                    continue;
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "quit" || trimmed == "exit" {
                info!("user requested exit");
                break;
            }
            if let Some(locale) = trimmed.strip_prefix(":locale ") {
                match self.orchestrator.update_locale(locale.trim()) {
                    Ok(()) => println!("  Locale switched to {}.", locale.trim()),
                    Err(e) => eprintln!("  {e}"),
                }
                continue;
            }
            if trimmed == ":reload" {
                match self.orchestrator.reload() {
                    Ok(()) => println!("  Locale tables reloaded."),
                    Err(e) => eprintln!("  {e}"),
                }
                continue;
            }

            self.turn(trimmed).await;
        }
        Ok(())
    }
}

fn render_event(event: &CanonicalEvent, as_json: bool) {
    if as_json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to serialise event"),
        }
        return;
    }

    match event {
        CanonicalEvent::Start => {}
        CanonicalEvent::TextDelta { text } => {
            print!("{text}");
            io::stdout().flush().ok();
        }
        CanonicalEvent::ToolCall { name, args } => {
            eprintln!("\n  [tool] {name} {args}");
        }
        CanonicalEvent::ToolResult { name, content } => {
            let preview: String = content.chars().take(120).collect();
            eprintln!("  [done] {name}: {}", preview.replace('\n', " "));
        }
        CanonicalEvent::Finish { reason } => {
            println!();
            info!(reason = %reason, "turn finished");
        }
        CanonicalEvent::Error { message } => {
            println!();
            eprintln!("  Error: {message}");
        }
    }
}
