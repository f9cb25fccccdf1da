//! Tool registry.
//!
//! Every capability the agent can call, whether built in or supplied by an
//! external [`capability::CapabilityProvider`], is wrapped in a
//! [`ToolDescriptor`]: a name, a description, a compiled parameter schema,
//! and an `invoke` function.  The [`ToolRegistry`] maps names to
//! descriptors; an unknown name yields [`AgentError::ToolNotFound`].
//!
//! The registry map is copy-on-write: registration builds a new map and
//! swaps it in, so a turn holding a snapshot never sees a partial update.

pub mod builtin;
pub mod capability;
pub mod selector;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::ToolDefinition;
use crate::stream::normalize_tool_content;

pub use builtin::{BuiltinDeps, EditorHost, FlowsDocument};
pub use capability::{CapabilityInfo, CapabilityProvider};
pub use selector::{ContextToolFactory, ScenarioToolSelector};

/// Memory search, always available outside the `general` scenario.
pub const SEARCH_MEMORY: &str = "search_memory";
/// Preference lookup.
pub const GET_USER_PREFERENCES: &str = "get_user_preferences";
/// Template lookup.
pub const GET_FLOW_TEMPLATES: &str = "get_flow_templates";

/// Tools appended to every non-general scenario.
pub const BASELINE_TOOLS: &[&str] = &[SEARCH_MEMORY, GET_USER_PREFERENCES, GET_FLOW_TEMPLATES];

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// Where a tool comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Implemented in this crate.
    BuiltIn,
    /// Supplied by an external capability provider.
    External,
}

/// An invocable named operation with a declared parameter schema.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Origin of the tool.
    fn origin(&self) -> ToolOrigin {
        ToolOrigin::BuiltIn
    }

    /// Run the tool.  Arguments have already been validated.
    async fn invoke(&self, args: Value) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Output of [`ToolDescriptor::invoke_guarded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedOutput {
    /// Normalised (and possibly truncated) result, or a description of the
    /// failure.
    pub content: String,
    /// Whether the invocation failed.
    pub is_error: bool,
    /// Whether `content` was truncated.
    pub truncated: bool,
}

/// A registered tool with its compiled schema.
#[derive(Clone)]
pub struct ToolDescriptor {
    tool: Arc<dyn Tool>,
    schema: Value,
    validator: Arc<JSONSchema>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.tool.name())
            .field("origin", &self.tool.origin())
            .finish()
    }
}

impl ToolDescriptor {
    /// Wrap a tool, compiling its parameter schema.
    pub fn new(tool: Arc<dyn Tool>) -> Result<Self> {
        let schema = tool.parameters();
        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| AgentError::InvalidToolSchema {
                tool_name: tool.name().to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            tool,
            schema,
            validator: Arc::new(validator),
        })
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        self.tool.name()
    }

    /// Tool description.
    pub fn description(&self) -> &str {
        self.tool.description()
    }

    /// Parameter schema.
    pub fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    /// Origin of the tool.
    pub fn origin(&self) -> ToolOrigin {
        self.tool.origin()
    }

    /// Definition sent to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            input_schema: self.schema.clone(),
        }
    }

    /// Validate `args` against the schema.
    pub fn validate(&self, args: &Value) -> Result<()> {
        if let Err(errors) = self.validator.validate(args) {
            let reasons: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            return Err(AgentError::InvalidToolArguments {
                tool_name: self.name().to_owned(),
                reason: reasons.join("; "),
            });
        }
        Ok(())
    }

    /// Validate and invoke.
    pub async fn invoke(&self, args: Value) -> Result<Value> {
        self.validate(&args)?;
        self.tool.invoke(args).await
    }

    /// Invoke without ever failing.
    ///
    /// Successful output is normalised to text and truncated to `max_bytes`
    /// with an explicit marker.  Errors become a descriptive string.
    pub async fn invoke_guarded(&self, args: Value, max_bytes: usize) -> GuardedOutput {
        match self.invoke(args).await {
            Ok(value) => {
                let text = normalize_tool_content(&value);
                let (content, truncated) = truncate_with_marker(&text, max_bytes);
                if truncated {
                    tracing::debug!(
                        tool = %self.name(),
                        original_bytes = text.len(),
                        max_bytes,
                        "tool result truncated"
                    );
                }
                GuardedOutput {
                    content,
                    is_error: false,
                    truncated,
                }
            }
            Err(e) => {
                tracing::warn!(tool = %self.name(), error = %e, "tool invocation failed");
                GuardedOutput {
                    content: format!("Error: {e}"),
                    is_error: true,
                    truncated: false,
                }
            }
        }
    }
}

/// Cut `s` to at most `max_bytes` on a char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub(crate) fn truncate_with_marker(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_owned(), false);
    }
    let kept = truncate_utf8(text, max_bytes);
    let omitted = text.len() - kept.len();
    (
        format!("{kept}\n...[truncated: {omitted} bytes omitted]"),
        true,
    )
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-keyed tool registry.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<Arc<BTreeMap<String, ToolDescriptor>>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let descriptor = ToolDescriptor::new(tool)?;
        let mut guard = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = BTreeMap::clone(&guard);
        tracing::debug!(tool = %descriptor.name(), origin = ?descriptor.origin(), "registering tool");
        next.insert(descriptor.name().to_owned(), descriptor);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Replace the whole tool map.
    pub fn replace_all(&self, tools: Vec<Arc<dyn Tool>>) -> Result<()> {
        let mut next = BTreeMap::new();
        for tool in tools {
            let descriptor = ToolDescriptor::new(tool)?;
            next.insert(descriptor.name().to_owned(), descriptor);
        }
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(())
    }

    /// The current map.
    pub fn snapshot(&self) -> Arc<BTreeMap<String, ToolDescriptor>> {
        Arc::clone(&self.tools.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Result<ToolDescriptor> {
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::ToolNotFound {
                tool_name: name.to_owned(),
            })
    }

    /// Whether a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
