//! CLI argument definitions for FlowPilot.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// FlowPilot -- a conversational assistant for automation-flow editors.
#[derive(Parser)]
#[command(
    name = "flowpilot",
    version,
    about = "FlowPilot -- conversational assistant for automation-flow editors",
    long_about = "Detects flow-creation intent, picks a conversational scenario and its tools, \
                  and streams tool-calling agent turns as canonical events."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args)]
pub struct GlobalArgs {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Active locale.
    #[arg(long, global = true, default_value = "en-US")]
    pub locale: String,

    /// Directory of locale pattern files (`<locale>.json|toml`).  The
    /// bundled tables are used when absent.
    #[arg(long, global = true)]
    pub locale_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Score a message for flow-creation intent.
    Detect {
        /// The message to analyse.
        message: String,

        /// Refine the verdict with the configured language model.
        #[arg(long)]
        semantic: bool,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Map a message to a conversational scenario.
    Classify {
        /// The message to classify.
        message: String,
    },

    /// Check a message for an explicit tool-invocation cue.
    Trigger {
        /// The message to inspect.
        message: String,
    },

    /// List the tools a scenario may use.
    Tools {
        /// Scenario key.
        #[arg(default_value = "general")]
        scenario: String,

        #[command(flatten)]
        editor: EditorArgs,
    },

    /// Run agent turns, one-shot or interactively.
    Chat {
        /// Message for a single turn.  Starts a REPL when omitted.
        message: Option<String>,

        /// Scenario key.  Classified from each message when omitted.
        #[arg(long, short)]
        scenario: Option<String>,

        /// Conversation session id.
        #[arg(long, default_value = "cli")]
        session: String,

        /// Orchestrator limits (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print canonical events as JSON lines instead of rendered text.
        #[arg(long)]
        events: bool,

        /// Reload locale files when they change (requires `--locale-dir`).
        #[arg(long)]
        watch: bool,

        #[command(flatten)]
        editor: EditorArgs,

        #[command(flatten)]
        model: ModelArgs,
    },
}

/// Editor state the context-bound tools read.
#[derive(Args, Clone, Default)]
pub struct EditorArgs {
    /// Flows export (a JSON array of tabs and nodes).
    #[arg(long)]
    pub flows: Option<PathBuf>,

    /// Id of the flow open in the editor.
    #[arg(long)]
    pub flow: Option<String>,

    /// Ids of the selected nodes, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Preferred response language (e.g. `zh-CN`).
    #[arg(long)]
    pub lang: Option<String>,
}

/// Model selection.  Flags win over `FLOWPILOT_*` environment variables.
#[derive(Args, Clone, Default)]
pub struct ModelArgs {
    /// Provider (openai, deepseek, openrouter, siliconflow, ollama, anthropic).
    #[arg(long)]
    pub provider: Option<String>,

    /// Model identifier.
    #[arg(long)]
    pub model: Option<String>,

    /// API key.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Endpoint override.
    #[arg(long)]
    pub base_url: Option<String>,
}
