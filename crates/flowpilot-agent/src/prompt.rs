//! Prompt construction.
//!
//! Scenario system prompts carry `{{name}}` placeholders filled from the
//! turn's [`ContextData`].  The explanation pass uses a fixed analytical
//! prompt (goal, mechanism, caveats) in the caller's response language.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::context::ContextData;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
});

/// Response language of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    /// Simplified Chinese.
    Chinese,
    /// English (the fallback).
    English,
}

impl Language {
    /// Pick the response language: the caller's stated preference first,
    /// then the script of the message itself.
    pub fn resolve(ctx: &ContextData, message: &str) -> Self {
        match ctx.language.as_deref() {
            Some(lang) if lang.to_ascii_lowercase().starts_with("zh") => Self::Chinese,
            Some(lang) if !lang.trim().is_empty() => Self::English,
            _ if message.chars().any(is_han) => Self::Chinese,
            _ => Self::English,
        }
    }
}

fn is_han(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

/// Fill `{{name}}` placeholders from `ctx`.  Unresolved names render empty.
pub fn render(template: &str, ctx: &ContextData) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            ctx.value(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Instruction for the explanation pass over raw tool output.
///
/// `results` pairs a tool name with its normalised output.
pub fn explain_prompt(language: Language, question: &str, results: &[(String, String)]) -> String {
    let mut out = String::new();
    match language {
        Language::Chinese => {
            out.push_str("以下是为回答用户问题而调用工具得到的原始结果。\n");
            out.push_str(&format!("用户问题：{question}\n\n"));
            for (name, content) in results {
                out.push_str(&format!("[{name}]\n{content}\n\n"));
            }
            out.push_str(
                "请用中文分析这些结果，不要直接复述原始数据：\n\
                 1. 目标：这些内容要实现什么；\n\
                 2. 机制：它是如何工作的，关键节点和数据如何流转；\n\
                 3. 注意事项：潜在问题、限制或改进建议。\n\
                 如果工具调用失败，请说明失败原因以及用户可以怎么做。",
            );
        }
        Language::English => {
            out.push_str("Below are raw tool results gathered to answer the user's question.\n");
            out.push_str(&format!("User question: {question}\n\n"));
            for (name, content) in results {
                out.push_str(&format!("[{name}]\n{content}\n\n"));
            }
            out.push_str(
                "Explain these results in English instead of repeating the raw data:\n\
                 1. Goal: what this is meant to achieve;\n\
                 2. Mechanism: how it works, which nodes matter and how data moves;\n\
                 3. Caveats: potential problems, limits or suggested improvements.\n\
                 If a tool call failed, say why and what the user can do next.",
            );
        }
    }
    out
}

/// Instruction prepended to the user message when a slash command names a
/// tool for the agent to call.
pub fn tool_instruction(tool: &str, args: Option<&str>, message: &str) -> String {
    match args.filter(|a| !a.trim().is_empty()) {
        Some(args) => format!(
            "Call the `{tool}` tool with these arguments: {args}\nThen answer the request.\n\nRequest: {message}"
        ),
        None => format!("Call the `{tool}` tool, then answer the request.\n\nRequest: {message}"),
    }
}
