//! CLI entry point for FlowPilot.
//!
//! This binary provides the `flowpilot` command with subcommands for intent
//! detection, scenario classification, trigger inspection, tool listing and
//! streaming chat turns.

mod cli;
mod helpers;
mod repl;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use flowpilot_agent::{ModelFactory, ProviderFactory};
use flowpilot_intent::{IntentDetector, ScenarioClassifier, SemanticAnalyzer};
use flowpilot_kernel::ToolTriggerDetector;

use cli::{Cli, Commands, EditorArgs, GlobalArgs, ModelArgs};
use helpers::{build_selector, context_from, init_tracing, load_flows, load_locales, new_store};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.global.verbose, cli.global.json_logs);

    match cli.command {
        Commands::Detect {
            message,
            semantic,
            model,
        } => cmd_detect(&cli.global, &message, semantic, &model).await,
        Commands::Classify { message } => cmd_classify(&message),
        Commands::Trigger { message } => cmd_trigger(&message),
        Commands::Tools { scenario, editor } => cmd_tools(&cli.global, &scenario, &editor).await,
        Commands::Chat {
            message,
            scenario,
            session,
            config,
            events,
            watch,
            editor,
            model,
        } => {
            let options = repl::ChatOptions {
                message,
                scenario,
                session,
                config,
                events,
                watch,
                editor,
                model,
            };
            repl::cmd_chat(&cli.global, options).await
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialise output")?;
    println!("{text}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: detect
// ---------------------------------------------------------------------------

async fn cmd_detect(global: &GlobalArgs, message: &str, semantic: bool, model: &ModelArgs) -> Result<()> {
    let locales = load_locales(global)?;
    let mut detector = IntentDetector::new(locales);

    if semantic {
        let config = helpers::resolve_model_config(model);
        let chat_model = ProviderFactory::new()
            .build(&config)
            .context("failed to build the semantic-analysis model")?;
        detector = detector.with_semantic(SemanticAnalyzer::new(chat_model));
    }

    let result = detector.detect_async(message, semantic).await;
    print_json(&result)
}

// ---------------------------------------------------------------------------
// Subcommand: classify
// ---------------------------------------------------------------------------

fn cmd_classify(message: &str) -> Result<()> {
    let scenario = ScenarioClassifier::new().classify(message);
    print_json(&json!({ "scenario": scenario }))
}

// ---------------------------------------------------------------------------
// Subcommand: trigger
// ---------------------------------------------------------------------------

fn cmd_trigger(message: &str) -> Result<()> {
    print_json(&ToolTriggerDetector::new().detect(message))
}

// ---------------------------------------------------------------------------
// Subcommand: tools
// ---------------------------------------------------------------------------

async fn cmd_tools(global: &GlobalArgs, scenario: &str, editor: &EditorArgs) -> Result<()> {
    let locales = load_locales(global)?;
    let flows = load_flows(editor.flows.as_deref()).await?;
    let selector = build_selector(flows, new_store())?;

    let snapshot = locales.snapshot();
    let tools = selector.tools_for(scenario, snapshot.scenario(scenario), &context_from(editor));
    let listing: Vec<_> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name(),
                "description": t.description(),
                "origin": t.origin(),
                "parameters": t.parameter_schema(),
            })
        })
        .collect();
    print_json(&json!({ "scenario": scenario, "tools": listing }))
}
