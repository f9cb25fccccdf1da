//! The capability-calling agent.
//!
//! An [`Agent`] pairs a model client with a scenario's system prompt.  It
//! offers two ways to run:
//!
//! - [`Agent::generate`] -- one streaming generation without tools.
//! - [`Agent::run`] -- the tool-calling loop:
//!   1. Send the conversation and tool definitions to the model.
//!   2. If the model requested tool calls, run them concurrently and feed
//!      the results back.
//!   3. Repeat until the model answers without tool calls or the cycle
//!      limit is hit.
//!
//! Agents are immutable once built and are shared through the
//! orchestrator's cache; everything that varies per turn (history, tools
//! bound to the editor selection) is passed in.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::ContextData;
use crate::error::{AgentError, Result};
use crate::llm::model::{ChatModel, ModelConfig};
use crate::llm::types::{ChatRequest, Message, ModelChunk, ToolCall, ToolDefinition};
use crate::prompt;
use crate::stream::{AgentStep, FinishReason};
use crate::tools::{GuardedOutput, ToolDescriptor};

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Composite cache key of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentKey {
    /// Scenario the agent serves.
    pub scenario: String,
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Endpoint override.
    pub base_url: Option<String>,
    credential: u64,
}

impl AgentKey {
    /// Key for `scenario` served by `config`.  The API key participates
    /// only as a fingerprint.
    pub fn new(scenario: &str, config: &ModelConfig) -> Self {
        let mut hasher = DefaultHasher::new();
        config.api_key.hash(&mut hasher);
        Self {
            scenario: scenario.to_owned(),
            provider: config.provider.trim().to_ascii_lowercase(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            credential: hasher.finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run types
// ---------------------------------------------------------------------------

/// Bounds applied to [`Agent::run`].
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// Maximum model round trips that may request tools.
    pub max_tool_cycles: u32,
    /// Byte ceiling per tool result.
    pub tool_result_max_bytes: usize,
}

/// One tool call made during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Tool name.
    pub name: String,
    /// Arguments the model supplied.
    pub args: Value,
    /// Normalised result or error description.
    pub content: String,
    /// Whether the call failed.
    pub is_error: bool,
}

/// Result of [`Agent::run`].
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// Text of the last model response.
    pub text: String,
    /// Every tool call, in request order.
    pub tool_outcomes: Vec<ToolOutcome>,
    /// Why the run stopped.
    pub finish: FinishReason,
    /// Model round trips used.
    pub cycles: u32,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// A model bound to a scenario.
pub struct Agent {
    key: AgentKey,
    model: Arc<dyn ChatModel>,
    system_template: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("key", &self.key)
            .field("provider", &self.model.provider())
            .field("model", &self.model.model_name())
            .finish()
    }
}

impl Agent {
    /// Bind `model` to a scenario prompt template.
    pub fn new(key: AgentKey, model: Arc<dyn ChatModel>, system_template: impl Into<String>) -> Self {
        Self {
            key,
            model,
            system_template: system_template.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Builder: sampling parameters for every request.
    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// The cache key.
    pub fn key(&self) -> &AgentKey {
        &self.key
    }

    /// The model client.
    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    /// The system prompt rendered for one turn.
    pub fn system_prompt(&self, ctx: &ContextData) -> String {
        prompt::render(&self.system_template, ctx)
    }

    fn request(&self, messages: Vec<Message>, tools: Vec<ToolDefinition>) -> ChatRequest {
        ChatRequest {
            model: self.key.model.clone(),
            messages,
            tools,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// One streaming generation without tools.  Returns the full text.
    pub async fn generate(
        &self,
        messages: Vec<Message>,
        on_token: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String> {
        let mut stream = self
            .model
            .generate_stream(self.request(messages, Vec::new()))
            .await?;

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                ModelChunk::Text(delta) => {
                    on_token(&delta);
                    text.push_str(&delta);
                }
                ModelChunk::ToolCall(call) => {
                    debug!(tool = %call.name, "ignoring tool call in plain generation");
                }
            }
        }
        Ok(text)
    }

    /// The tool-calling loop.
    ///
    /// Tool failures never abort the run; they are fed back to the model as
    /// error text.  Hitting `max_tool_cycles` ends the run with
    /// [`FinishReason::ToolLimit`] and whatever text exists.
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        tools: &[ToolDescriptor],
        limits: RunLimits,
        on_step: &mut (dyn FnMut(AgentStep) + Send),
    ) -> Result<AgentRun> {
        let definitions: Vec<ToolDefinition> = tools.iter().map(ToolDescriptor::definition).collect();
        let mut outcomes = Vec::new();
        let mut text = String::new();

        info!(
            scenario = %self.key.scenario,
            max_tool_cycles = limits.max_tool_cycles,
            tool_count = definitions.len(),
            "starting agent run"
        );

        for cycle in 0..limits.max_tool_cycles {
            let mut stream = self
                .model
                .generate_stream(self.request(messages.clone(), definitions.clone()))
                .await?;

            text.clear();
            let mut calls: Vec<ToolCall> = Vec::new();
            while let Some(chunk) = stream.next().await {
                match chunk? {
                    ModelChunk::Text(delta) => {
                        text.push_str(&delta);
                        on_step(AgentStep::Token(delta));
                    }
                    ModelChunk::ToolCall(call) => calls.push(call),
                }
            }

            if calls.is_empty() {
                debug!(cycles = cycle + 1, "agent answered without tool calls");
                return Ok(AgentRun {
                    text,
                    tool_outcomes: outcomes,
                    finish: FinishReason::Stop,
                    cycles: cycle + 1,
                });
            }

            info!(
                cycle,
                tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "model requested tool calls"
            );
            messages.push(Message::assistant_tool_calls(text.clone(), calls.clone()));
            for call in &calls {
                on_step(AgentStep::ToolDecision {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                });
            }

            let outputs = execute_tool_calls(&calls, tools, limits.tool_result_max_bytes, on_step).await;
            for (call, output) in calls.into_iter().zip(outputs) {
                messages.push(Message::tool_result(call.id, output.content.clone()));
                outcomes.push(ToolOutcome {
                    name: call.name,
                    args: call.arguments,
                    content: output.content,
                    is_error: output.is_error,
                });
            }
        }

        warn!(
            scenario = %self.key.scenario,
            max_tool_cycles = limits.max_tool_cycles,
            "tool cycle limit reached"
        );
        Ok(AgentRun {
            text,
            tool_outcomes: outcomes,
            finish: FinishReason::ToolLimit,
            cycles: limits.max_tool_cycles,
        })
    }
}

/// Run a batch of tool calls concurrently.
///
/// Completions are reported through `on_step` as they finish; the returned
/// outputs are in request order.
async fn execute_tool_calls(
    calls: &[ToolCall],
    tools: &[ToolDescriptor],
    max_bytes: usize,
    on_step: &mut (dyn FnMut(AgentStep) + Send),
) -> Vec<GuardedOutput> {
    let mut pending: FuturesUnordered<_> = calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            let tool = tools.iter().find(|t| t.name() == call.name).cloned();
            async move {
                let output = match tool {
                    Some(tool) => tool.invoke_guarded(call.arguments.clone(), max_bytes).await,
                    None => {
                        let err = AgentError::ToolNotFound {
                            tool_name: call.name.clone(),
                        };
                        warn!(tool = %call.name, "model requested an unavailable tool");
                        GuardedOutput {
                            content: format!("Error: {err}"),
                            is_error: true,
                            truncated: false,
                        }
                    }
                };
                (index, output)
            }
        })
        .collect();

    let mut outputs: Vec<Option<GuardedOutput>> = vec![None; calls.len()];
    while let Some((index, output)) = pending.next().await {
        debug!(tool = %calls[index].name, is_error = output.is_error, "tool call completed");
        on_step(AgentStep::ToolCompletion {
            name: calls[index].name.clone(),
            output: Value::String(output.content.clone()),
        });
        outputs[index] = Some(output);
    }

    outputs
        .into_iter()
        .map(|o| {
            o.unwrap_or_else(|| GuardedOutput {
                content: "Error: tool call did not complete".into(),
                is_error: true,
                truncated: false,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
