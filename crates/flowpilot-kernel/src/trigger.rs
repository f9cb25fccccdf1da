//! Tool trigger detection.
//!
//! Recognises explicit tool-invocation cues in a user message:
//!
//! | Cue | Example | Direct execution |
//! |-----|---------|------------------|
//! | Slash command | `/tool:get_flows`, `/工具：get_flow，abc` | no |
//! | Instruction phrase | `please use get_flow for id "f1"` | yes |
//!
//! Slash commands accept `tool` or one of its localized aliases, a `\w+` tool
//! name, and an optional argument separated by whitespace or a Latin or CJK
//! comma.  The argument is captured verbatim and trimmed.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Localized spellings of the slash-command keyword.
pub const DEFAULT_ALIASES: &[&str] = &[
    "tool",
    "工具",
    "ツール",
    "도구",
    "herramienta",
    "outil",
    "werkzeug",
    "ferramenta",
    "инструмент",
];

static DEFAULT_SLASH: LazyLock<Regex> = LazyLock::new(|| {
    let aliases: Vec<String> = DEFAULT_ALIASES.iter().map(|a| a.to_string()).collect();
    slash_pattern(&aliases).expect("default slash-command pattern is valid")
});

static USE_TOOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\buse|\bcall|\brun|使用|调用|用)\s*(?:the\s+)?[`'“‘]?(?P<name>[a-z][a-z0-9]*(?:_[a-z0-9]+)+)[`'”’]?",
    )
    .expect("use-tool pattern is valid")
});

static QUOTED_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:^|[^a-z0-9_])id[^"'“”‘’`\n]{0,16}?["'“‘`](?P<id>[^"'“”‘’`\n]+)["'”’`]"#,
    )
    .expect("quoted-id pattern is valid")
});

fn slash_pattern(aliases: &[String]) -> Result<Regex> {
    let alternation = aliases
        .iter()
        .map(|a| regex::escape(a))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(
        r"(?is)^\s*/(?:{alternation})[:：](?P<name>\w+)(?:[\s,，、]+(?P<args>.*?))?\s*$"
    );
    Regex::new(&pattern).map_err(|e| KernelError::InvalidPattern {
        pattern,
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Outcome of [`ToolTriggerDetector::detect`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    /// Whether an explicit tool cue was found.
    pub is_tool_trigger: bool,
    /// Name of the requested tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Raw argument text, trimmed.  Empty when none was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<String>,
    /// Whether the tool should be invoked without going through the agent.
    pub direct_execution: bool,
}

impl TriggerResult {
    /// The "no trigger" result.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless detector of explicit tool-invocation cues.
#[derive(Debug, Clone)]
pub struct ToolTriggerDetector {
    aliases: Vec<String>,
    slash: Regex,
}

impl Default for ToolTriggerDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolTriggerDetector {
    /// Detector with the default alias set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            aliases: DEFAULT_ALIASES.iter().map(|a| a.to_string()).collect(),
            slash: DEFAULT_SLASH.clone(),
        }
    }

    /// Builder: accept an additional slash-command keyword.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Result<Self> {
        let alias = alias.into();
        if alias.trim().is_empty() || self.aliases.contains(&alias) {
            return Ok(self);
        }
        self.aliases.push(alias);
        self.slash = slash_pattern(&self.aliases)?;
        Ok(self)
    }

    /// Accepted slash-command keywords.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Inspect a message for an explicit tool cue.
    pub fn detect(&self, message: &str) -> TriggerResult {
        if let Some(caps) = self.slash.captures(message) {
            let name = caps.name("name").map(|m| m.as_str().to_owned());
            let args = caps
                .name("args")
                .map(|m| m.as_str().trim().to_owned())
                .unwrap_or_default();
            tracing::debug!(tool = ?name, args = %args, "slash-command tool trigger");
            return TriggerResult {
                is_tool_trigger: true,
                tool_name: name,
                tool_args: Some(args),
                direct_execution: false,
            };
        }

        if let Some((name, id)) = detect_use_tool(message) {
            tracing::debug!(tool = %name, id = %id, "direct tool trigger");
            return TriggerResult {
                is_tool_trigger: true,
                tool_name: Some(name),
                tool_args: Some(id),
                direct_execution: true,
            };
        }

        TriggerResult::none()
    }
}

/// Recognise "use <tool> ... id 'X'" instructions.
///
/// Cheap substring checks gate the regexes; both the tool name and a quoted
/// id must be present.
fn detect_use_tool(message: &str) -> Option<(String, String)> {
    let lowered = message.to_lowercase();
    let has_verb = ["use", "call", "run", "使用", "调用", "用"]
        .iter()
        .any(|v| lowered.contains(v));
    if !has_verb || !lowered.contains("id") {
        return None;
    }

    let name = USE_TOOL.captures(message)?.name("name")?.as_str().to_owned();
    let id = QUOTED_ID
        .captures(message)?
        .name("id")?
        .as_str()
        .trim()
        .to_owned();
    if id.is_empty() {
        return None;
    }
    Some((name, id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
