//! External capability providers.
//!
//! A [`CapabilityProvider`] is any out-of-process source of tools (a plugin
//! host, a remote tool server).  Each capability it lists is wrapped in a
//! [`CapabilityTool`] and registered like a built-in, so the agent sees one
//! uniform tool contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::tools::{Tool, ToolOrigin, ToolRegistry};

/// A capability advertised by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInfo {
    /// Tool name.
    pub name: String,
    /// Description shown to the model.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// A source of externally implemented tools.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// The capabilities currently offered.
    async fn list_capabilities(&self) -> Result<Vec<CapabilityInfo>>;

    /// Invoke one capability.
    async fn invoke(&self, capability: &str, args: Value) -> Result<Value>;
}

/// Adapts one provider capability into a [`Tool`].
pub struct CapabilityTool {
    info: CapabilityInfo,
    provider: Arc<dyn CapabilityProvider>,
}

impl CapabilityTool {
    /// Wrap `info` served by `provider`.
    pub fn new(info: CapabilityInfo, provider: Arc<dyn CapabilityProvider>) -> Self {
        Self { info, provider }
    }
}

#[async_trait]
impl Tool for CapabilityTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters(&self) -> Value {
        self.info.input_schema.clone()
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::External
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        self.provider.invoke(&self.info.name, args).await
    }
}

/// Register every capability of `provider`.  Returns the registered names.
pub async fn register_provider(
    registry: &ToolRegistry,
    provider: Arc<dyn CapabilityProvider>,
) -> Result<Vec<String>> {
    let capabilities = provider.list_capabilities().await?;
    let mut names = Vec::with_capacity(capabilities.len());
    for info in capabilities {
        names.push(info.name.clone());
        registry.register(Arc::new(CapabilityTool::new(info, Arc::clone(&provider))))?;
    }
    info!(provider = provider.name(), count = names.len(), "registered external capabilities");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use serde_json::json;

    struct Weather;

    #[async_trait]
    impl CapabilityProvider for Weather {
        fn name(&self) -> &str {
            "weather"
        }

        async fn list_capabilities(&self) -> Result<Vec<CapabilityInfo>> {
            Ok(vec![serde_json::from_value(json!({
                "name": "forecast",
                "description": "Forecast for a city",
                "inputSchema": {
                    "type": "object",
                    "properties": { "city": { "type": "string" } },
                    "required": ["city"]
                }
            }))?])
        }

        async fn invoke(&self, capability: &str, args: Value) -> Result<Value> {
            match capability {
                "forecast" => Ok(json!({ "content": [{ "type": "text", "text": format!("sunny in {}", args["city"].as_str().unwrap_or("?")) }] })),
                other => Err(AgentError::ToolNotFound {
                    tool_name: other.into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn provider_tools_share_the_builtin_contract() {
        let registry = ToolRegistry::new();
        let names = register_provider(&registry, Arc::new(Weather)).await.unwrap();
        assert_eq!(names, vec!["forecast"]);

        let tool = registry.get("forecast").unwrap();
        assert_eq!(tool.origin(), ToolOrigin::External);

        let out = tool.invoke_guarded(json!({ "city": "Oslo" }), 1024).await;
        assert_eq!(out.content, "sunny in Oslo");

        let bad = tool.invoke_guarded(json!({}), 1024).await;
        assert!(bad.is_error);
    }

    #[test]
    fn missing_schema_defaults_to_object() {
        let info: CapabilityInfo = serde_json::from_value(json!({ "name": "ping" })).unwrap();
        assert_eq!(info.input_schema, json!({ "type": "object" }));
    }
}
