//! Built-in tools.
//!
//! - `get_flows` lists every flow known to the editor host.
//! - `get_flow` and `get_node_info` are context-bound: they default to the
//!   flow and nodes selected in the editor for the current turn.
//! - `search_memory`, `get_user_preferences` and `get_flow_templates` are the
//!   baseline tools backed by the stores in [`crate::store`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::context::ContextData;
use crate::error::{AgentError, Result};
use crate::store::{ConversationStore, PreferenceStore, TemplateStore};
use crate::tools::selector::ContextToolFactory;
use crate::tools::{
    GET_FLOW_TEMPLATES, GET_USER_PREFERENCES, SEARCH_MEMORY, Tool, ToolDescriptor, ToolRegistry,
};

/// Lists all flows.
pub const GET_FLOWS: &str = "get_flows";
/// Reads one flow.
pub const GET_FLOW: &str = "get_flow";
/// Reads node details.
pub const GET_NODE_INFO: &str = "get_node_info";

const DEFAULT_SEARCH_LIMIT: u64 = 5;

// ---------------------------------------------------------------------------
// Editor host
// ---------------------------------------------------------------------------

/// Read access to the flow editor.
#[async_trait]
pub trait EditorHost: Send + Sync {
    /// Summaries of all flows.
    async fn flows(&self) -> Result<Value>;

    /// One flow with its nodes, or `None` if the id is unknown.
    async fn flow(&self, id: &str) -> Result<Option<Value>>;

    /// One node, or `None` if the id is unknown.
    async fn node(&self, id: &str) -> Result<Option<Value>>;
}

/// An [`EditorHost`] over a Node-RED style `flows.json` export.
///
/// The export is a flat array: flow tabs have `"type": "tab"`, every other
/// node points at its tab through `z`.
#[derive(Debug, Clone, Default)]
pub struct FlowsDocument {
    nodes: Vec<Value>,
}

impl FlowsDocument {
    /// Wrap an already parsed export.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(nodes) => Ok(Self { nodes }),
            other => Err(AgentError::Configuration {
                reason: format!(
                    "flows document must be a JSON array, found {}",
                    json_type(&other)
                ),
            }),
        }
    }

    /// Parse an export from text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Read an export from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::Configuration {
                reason: format!("cannot read {}: {e}", path.display()),
            })?;
        Self::from_json_str(&text)
    }

    /// Number of entries in the export.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the export is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn tabs(&self) -> impl Iterator<Item = &Value> {
        self.nodes.iter().filter(|n| n["type"] == "tab")
    }

    fn nodes_in<'a>(&'a self, tab: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n["z"].as_str() == Some(tab))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl EditorHost for FlowsDocument {
    async fn flows(&self) -> Result<Value> {
        let flows: Vec<Value> = self
            .tabs()
            .map(|tab| {
                let id = tab["id"].as_str().unwrap_or_default();
                json!({
                    "id": id,
                    "label": tab["label"],
                    "disabled": tab["disabled"].as_bool().unwrap_or(false),
                    "nodeCount": self.nodes_in(id).count(),
                })
            })
            .collect();
        Ok(json!({ "flows": flows }))
    }

    async fn flow(&self, id: &str) -> Result<Option<Value>> {
        let Some(tab) = self.tabs().find(|t| t["id"].as_str() == Some(id)) else {
            return Ok(None);
        };
        let nodes: Vec<Value> = self.nodes_in(id).cloned().collect();
        Ok(Some(json!({
            "id": id,
            "label": tab["label"],
            "info": tab["info"],
            "nodes": nodes,
        })))
    }

    async fn node(&self, id: &str) -> Result<Option<Value>> {
        Ok(self
            .nodes
            .iter()
            .find(|n| n["id"].as_str() == Some(id) && n["type"] != "tab")
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Editor tools
// ---------------------------------------------------------------------------

/// `get_flows`: every flow in the editor.
pub struct GetFlowsTool {
    host: Arc<dyn EditorHost>,
}

impl GetFlowsTool {
    /// Create the tool over `host`.
    pub fn new(host: Arc<dyn EditorHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for GetFlowsTool {
    fn name(&self) -> &str {
        GET_FLOWS
    }

    fn description(&self) -> &str {
        "List all flows in the editor with their ids, labels and node counts."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, _args: Value) -> Result<Value> {
        self.host.flows().await
    }
}

/// `get_flow`: one flow, defaulting to the selected one.
pub struct GetFlowTool {
    host: Arc<dyn EditorHost>,
    selected: Option<String>,
}

impl GetFlowTool {
    /// Create the tool bound to the currently selected flow.
    pub fn new(host: Arc<dyn EditorHost>, selected: Option<String>) -> Self {
        Self { host, selected }
    }
}

#[async_trait]
impl Tool for GetFlowTool {
    fn name(&self) -> &str {
        GET_FLOW
    }

    fn description(&self) -> &str {
        "Read one flow and all of its nodes. Defaults to the flow selected in the editor."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Flow id; omit for the selected flow" }
            }
        })
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        let id = args["id"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .or_else(|| self.selected.clone())
            .ok_or_else(|| AgentError::ToolExecutionFailed {
                tool_name: GET_FLOW.into(),
                reason: "no flow id given and no flow is selected".into(),
            })?;

        debug!(flow = %id, "reading flow");
        self.host
            .flow(&id)
            .await?
            .ok_or_else(|| AgentError::ToolExecutionFailed {
                tool_name: GET_FLOW.into(),
                reason: format!("flow `{id}` not found"),
            })
    }
}

/// `get_node_info`: node details, defaulting to the selected nodes.
pub struct GetNodeInfoTool {
    host: Arc<dyn EditorHost>,
    selected: Vec<String>,
}

impl GetNodeInfoTool {
    /// Create the tool bound to the currently selected nodes.
    pub fn new(host: Arc<dyn EditorHost>, selected: Vec<String>) -> Self {
        Self { host, selected }
    }
}

#[async_trait]
impl Tool for GetNodeInfoTool {
    fn name(&self) -> &str {
        GET_NODE_INFO
    }

    fn description(&self) -> &str {
        "Read the configuration of nodes. Defaults to the nodes selected in the editor."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Node ids; omit for the selected nodes"
                }
            }
        })
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        let requested: Vec<String> = args["ids"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let ids = if requested.is_empty() {
            self.selected.clone()
        } else {
            requested
        };
        if ids.is_empty() {
            return Err(AgentError::ToolExecutionFailed {
                tool_name: GET_NODE_INFO.into(),
                reason: "no node ids given and no nodes are selected".into(),
            });
        }

        let mut nodes = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.host.node(&id).await? {
                Some(node) => nodes.push(node),
                None => missing.push(id),
            }
        }
        Ok(json!({ "nodes": nodes, "missing": missing }))
    }
}

// ---------------------------------------------------------------------------
// Baseline tools
// ---------------------------------------------------------------------------

/// `search_memory`: past conversation search.
pub struct SearchMemoryTool {
    store: Arc<dyn ConversationStore>,
}

impl SearchMemoryTool {
    /// Create the tool over `store`.
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &str {
        SEARCH_MEMORY
    }

    fn description(&self) -> &str {
        "Search earlier conversations for relevant messages."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Text to look for" },
                "scenario": { "type": "string", "description": "Restrict to one scenario" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        let query = args["query"].as_str().unwrap_or_default();
        let scenario = args["scenario"].as_str();
        let limit = args["limit"].as_u64().unwrap_or(DEFAULT_SEARCH_LIMIT) as usize;

        debug!(query, ?scenario, limit, "searching conversations");
        let hits = self
            .store
            .search_conversations(query, scenario, limit)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed {
                tool_name: SEARCH_MEMORY.into(),
                reason: e.to_string(),
            })?;

        let results: Vec<Value> = hits
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                    "scenario": m.scenario,
                    "at": m.created_at.to_rfc3339(),
                })
            })
            .collect();
        Ok(json!({ "results": results }))
    }
}

/// `get_user_preferences`.
pub struct GetUserPreferencesTool {
    store: Arc<dyn PreferenceStore>,
}

impl GetUserPreferencesTool {
    /// Create the tool over `store`.
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetUserPreferencesTool {
    fn name(&self) -> &str {
        GET_USER_PREFERENCES
    }

    fn description(&self) -> &str {
        "Read the user's saved preferences."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, _args: Value) -> Result<Value> {
        self.store.preferences().await
    }
}

/// `get_flow_templates`.
pub struct GetFlowTemplatesTool {
    store: Arc<dyn TemplateStore>,
}

impl GetFlowTemplatesTool {
    /// Create the tool over `store`.
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetFlowTemplatesTool {
    fn name(&self) -> &str {
        GET_FLOW_TEMPLATES
    }

    fn description(&self) -> &str {
        "Find reusable flow templates, optionally filtered by a query."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            }
        })
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        let templates = self.store.templates(args["query"].as_str()).await?;
        Ok(json!({ "templates": templates }))
    }
}

// ---------------------------------------------------------------------------
// Context factories
// ---------------------------------------------------------------------------

struct SelectedFlowFactory {
    host: Arc<dyn EditorHost>,
}

impl ContextToolFactory for SelectedFlowFactory {
    fn name(&self) -> &str {
        GET_FLOW
    }

    fn build(&self, ctx: &ContextData) -> Result<ToolDescriptor> {
        ToolDescriptor::new(Arc::new(GetFlowTool::new(
            Arc::clone(&self.host),
            ctx.selected_flow_id.clone(),
        )))
    }
}

struct SelectedNodesFactory {
    host: Arc<dyn EditorHost>,
}

impl ContextToolFactory for SelectedNodesFactory {
    fn name(&self) -> &str {
        GET_NODE_INFO
    }

    fn build(&self, ctx: &ContextData) -> Result<ToolDescriptor> {
        ToolDescriptor::new(Arc::new(GetNodeInfoTool::new(
            Arc::clone(&self.host),
            ctx.selected_node_ids.clone(),
        )))
    }
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

/// Collaborators the built-in tools read from.
#[derive(Clone)]
pub struct BuiltinDeps {
    /// Editor access.
    pub host: Arc<dyn EditorHost>,
    /// Conversation history.
    pub conversations: Arc<dyn ConversationStore>,
    /// Preferences.
    pub preferences: Arc<dyn PreferenceStore>,
    /// Templates.
    pub templates: Arc<dyn TemplateStore>,
}

impl std::fmt::Debug for BuiltinDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinDeps").finish_non_exhaustive()
    }
}

/// Register the static built-ins into `registry` and return the factories
/// for the context-bound ones.
pub fn install(
    registry: &ToolRegistry,
    deps: &BuiltinDeps,
) -> Result<Vec<Arc<dyn ContextToolFactory>>> {
    registry.register(Arc::new(GetFlowsTool::new(Arc::clone(&deps.host))))?;
    registry.register(Arc::new(SearchMemoryTool::new(Arc::clone(&deps.conversations))))?;
    registry.register(Arc::new(GetUserPreferencesTool::new(Arc::clone(
        &deps.preferences,
    ))))?;
    registry.register(Arc::new(GetFlowTemplatesTool::new(Arc::clone(&deps.templates))))?;

    Ok(vec![
        Arc::new(SelectedFlowFactory {
            host: Arc::clone(&deps.host),
        }),
        Arc::new(SelectedNodesFactory {
            host: Arc::clone(&deps.host),
        }),
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Role;
    use crate::store::InMemoryStore;
    use crate::tools::ScenarioToolSelector;

    fn document() -> FlowsDocument {
        FlowsDocument::from_value(json!([
            { "id": "t1", "type": "tab", "label": "Greenhouse" },
            { "id": "t2", "type": "tab", "label": "Lights", "disabled": true },
            { "id": "n1", "type": "mqtt in", "z": "t1", "topic": "sensors/temp" },
            { "id": "n2", "type": "switch", "z": "t1" },
            { "id": "n3", "type": "inject", "z": "t2" }
        ]))
        .unwrap()
    }

    fn deps() -> (BuiltinDeps, Arc<InMemoryStore>) {
        let store = Arc::new(
            InMemoryStore::new()
                .with_preference("units", json!("metric"))
                .with_templates(InMemoryStore::default_templates()),
        );
        let deps = BuiltinDeps {
            host: Arc::new(document()),
            conversations: store.clone(),
            preferences: store.clone(),
            templates: store.clone(),
        };
        (deps, store)
    }

    #[test]
    fn document_must_be_an_array() {
        assert!(FlowsDocument::from_value(json!({ "flows": [] })).is_err());
        assert_eq!(document().len(), 5);
    }

    #[tokio::test]
    async fn flows_summary_counts_nodes() {
        let out = document().flows().await.unwrap();
        let flows = out["flows"].as_array().unwrap();
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0]["nodeCount"], 2);
        assert_eq!(flows[1]["disabled"], true);
    }

    #[tokio::test]
    async fn get_flow_defaults_to_selection() {
        let host: Arc<dyn EditorHost> = Arc::new(document());
        let tool = GetFlowTool::new(host.clone(), Some("t1".into()));
        let out = tool.invoke(json!({})).await.unwrap();
        assert_eq!(out["label"], "Greenhouse");
        assert_eq!(out["nodes"].as_array().unwrap().len(), 2);

        let explicit = tool.invoke(json!({ "id": "t2" })).await.unwrap();
        assert_eq!(explicit["label"], "Lights");

        let unbound = GetFlowTool::new(host, None);
        assert!(matches!(
            unbound.invoke(json!({})).await.unwrap_err(),
            AgentError::ToolExecutionFailed { .. }
        ));
    }

    #[tokio::test]
    async fn get_node_info_reports_missing() {
        let tool = GetNodeInfoTool::new(Arc::new(document()), vec!["n1".into()]);
        let out = tool.invoke(json!({})).await.unwrap();
        assert_eq!(out["nodes"][0]["topic"], "sensors/temp");

        let out = tool.invoke(json!({ "ids": ["n3", "zz"] })).await.unwrap();
        assert_eq!(out["nodes"].as_array().unwrap().len(), 1);
        assert_eq!(out["missing"], json!(["zz"]));
    }

    #[tokio::test]
    async fn install_wires_everything() {
        let (deps, store) = deps();
        store
            .append_turn("s", Role::User, "how do I read MQTT?", "development", None)
            .await
            .unwrap();

        let registry = Arc::new(ToolRegistry::new());
        let factories = install(&registry, &deps).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(factories.len(), 2);

        let selector = ScenarioToolSelector::new(registry.clone()).with_contextual_all(factories);
        let ctx = ContextData::default().with_flow("t1").with_nodes(["n2"]);
        let tools = selector.tools_for("development", None, &ctx);
        assert_eq!(tools.len(), 6);

        let memory = registry.get(SEARCH_MEMORY).unwrap();
        let out = memory.invoke(json!({ "query": "mqtt" })).await.unwrap();
        assert_eq!(out["results"].as_array().unwrap().len(), 1);

        let prefs = registry.get(GET_USER_PREFERENCES).unwrap();
        assert_eq!(prefs.invoke(json!({})).await.unwrap()["units"], "metric");

        let flow = tools.iter().find(|t| t.name() == GET_FLOW).unwrap();
        assert_eq!(flow.invoke(json!({})).await.unwrap()["id"], "t1");
    }

    #[tokio::test]
    async fn search_memory_requires_query() {
        let (deps, _) = deps();
        let d = ToolDescriptor::new(Arc::new(SearchMemoryTool::new(deps.conversations))).unwrap();
        let out = d.invoke_guarded(json!({}), 1024).await;
        assert!(out.is_error);
    }
}
