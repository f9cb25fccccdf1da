//! Scenario tool selection.
//!
//! Resolves the tool set a scenario may use for one turn:
//!
//! 1. An explicit `tools` list in the scenario config is honoured in order.
//! 2. Without a list (or for an unknown scenario) every registered tool plus
//!    every context-bound tool is offered, except for `general`, which only
//!    gets memory search.
//! 3. Every non-general scenario also gets the baseline tools
//!    ([`super::BASELINE_TOOLS`]).
//!
//! Context-bound tools close over ids from [`ContextData`] and are therefore
//! built per call by a [`ContextToolFactory`], never at registration time.

use std::collections::HashSet;
use std::sync::Arc;

use flowpilot_kernel::{GENERAL_SCENARIO, ScenarioConfig};

use crate::context::ContextData;
use crate::error::Result;
use crate::tools::{BASELINE_TOOLS, SEARCH_MEMORY, ToolDescriptor, ToolRegistry};

/// Builds a tool bound to the caller's context.
pub trait ContextToolFactory: Send + Sync {
    /// Name of the tool this factory builds.
    fn name(&self) -> &str;

    /// Build the tool for one turn.
    fn build(&self, ctx: &ContextData) -> Result<ToolDescriptor>;
}

/// Resolves scenario tool sets against a [`ToolRegistry`].
#[derive(Clone)]
pub struct ScenarioToolSelector {
    registry: Arc<ToolRegistry>,
    contextual: Vec<Arc<dyn ContextToolFactory>>,
}

impl std::fmt::Debug for ScenarioToolSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioToolSelector")
            .field("registered", &self.registry.names())
            .field(
                "contextual",
                &self.contextual.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ScenarioToolSelector {
    /// Create a selector over `registry` with no context-bound tools.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            contextual: Vec::new(),
        }
    }

    /// Builder: add a context-bound tool factory.
    pub fn with_contextual(mut self, factory: Arc<dyn ContextToolFactory>) -> Self {
        self.contextual.push(factory);
        self
    }

    /// Builder: add several context-bound tool factories.
    pub fn with_contextual_all(
        mut self,
        factories: impl IntoIterator<Item = Arc<dyn ContextToolFactory>>,
    ) -> Self {
        self.contextual.extend(factories);
        self
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Every tool name the selector could resolve.
    pub fn known_names(&self) -> Vec<String> {
        let mut names = self.registry.names();
        names.extend(self.contextual.iter().map(|c| c.name().to_owned()));
        names.sort();
        names.dedup();
        names
    }

    /// Tool names offered to `scenario`, in order, before context binding.
    pub fn names_for(&self, scenario: &str, config: Option<&ScenarioConfig>) -> Vec<String> {
        let is_general = scenario == GENERAL_SCENARIO;

        let mut names: Vec<String> = match config.and_then(|c| c.tools.as_ref()) {
            Some(list) => list.clone(),
            None if is_general => vec![SEARCH_MEMORY.to_owned()],
            None => self.known_names(),
        };

        if !is_general {
            names.extend(BASELINE_TOOLS.iter().map(|n| (*n).to_owned()));
        }

        let mut seen = HashSet::new();
        names.retain(|n| seen.insert(n.clone()));
        names
    }

    /// Resolve the tools for one turn.
    ///
    /// Names that resolve to nothing are skipped with a warning; a factory
    /// that fails to build is skipped the same way.
    pub fn tools_for(
        &self,
        scenario: &str,
        config: Option<&ScenarioConfig>,
        ctx: &ContextData,
    ) -> Vec<ToolDescriptor> {
        let registered = self.registry.snapshot();
        let mut tools = Vec::new();

        for name in self.names_for(scenario, config) {
            if let Some(factory) = self.contextual.iter().find(|f| f.name() == name) {
                match factory.build(ctx) {
                    Ok(tool) => tools.push(tool),
                    Err(e) => {
                        tracing::warn!(tool = %name, error = %e, "context-bound tool unavailable")
                    }
                }
                continue;
            }
            match registered.get(&name) {
                Some(tool) => tools.push(tool.clone()),
                None => tracing::debug!(scenario, tool = %name, "tool not registered, skipping"),
            }
        }

        tracing::debug!(
            scenario,
            tools = ?tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "resolved scenario tools"
        );
        tools
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
