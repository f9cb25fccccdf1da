//! Integration tests for the flowpilot-agent crate.
//!
//! These tests exercise the public tool, provider and streaming surfaces
//! without a live model connection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use flowpilot_agent::tools::capability::register_provider;
use flowpilot_agent::{
    AgentError, CanonicalEvent, CapabilityInfo, CapabilityProvider, ContextData, FinishReason,
    LlmClient, LlmClientConfig, ModelConfig, ProviderFactory, ScenarioToolSelector,
    StreamMultiplexer, ToolOrigin, ToolRegistry, WireFormat, direct_arguments,
    normalize_tool_content,
};
use flowpilot_kernel::LocaleStore;

// ═══════════════════════════════════════════════════════════════════════
//  Provider resolution
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn every_openai_compatible_provider_resolves() {
    let factory = ProviderFactory::new();
    for provider in ["openai", "deepseek", "openrouter", "siliconflow"] {
        let config = factory
            .resolve(&ModelConfig::new(provider, "m").with_api_key("k"))
            .unwrap();
        assert_eq!(config.wire, WireFormat::OpenAi, "{provider}");
    }
    let anthropic = factory
        .resolve(&ModelConfig::new("anthropic", "claude").with_api_key("k"))
        .unwrap();
    assert_eq!(anthropic.wire, WireFormat::Anthropic);
}

#[test]
fn unsupported_provider_is_a_configuration_error() {
    let err = ProviderFactory::new()
        .resolve(&ModelConfig::new("fax", "m"))
        .unwrap_err();
    assert!(matches!(err, AgentError::UnsupportedProvider { .. }));
    assert!(err.is_configuration());
}

#[test]
fn client_builds_from_config() {
    let config = LlmClientConfig::new(
        "ollama",
        WireFormat::OpenAi,
        String::new(),
        String::from("llama3"),
        String::from("http://localhost:11434/v1/"),
    );
    let client = LlmClient::new(config).unwrap();
    assert_eq!(client.config().base_url, "http://localhost:11434/v1");
}

// ═══════════════════════════════════════════════════════════════════════
//  Tools
// ═══════════════════════════════════════════════════════════════════════

struct Plc;

#[async_trait]
impl CapabilityProvider for Plc {
    fn name(&self) -> &str {
        "plc-gateway"
    }

    async fn list_capabilities(&self) -> flowpilot_agent::Result<Vec<CapabilityInfo>> {
        Ok(vec![
            CapabilityInfo {
                name: "read_register".into(),
                description: "Read a PLC register".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "address": { "type": "integer" } },
                    "required": ["address"]
                }),
            },
            CapabilityInfo {
                name: "dump_registers".into(),
                description: "Dump every register".into(),
                input_schema: json!({ "type": "object" }),
            },
        ])
    }

    async fn invoke(&self, capability: &str, args: Value) -> flowpilot_agent::Result<Value> {
        match capability {
            "read_register" => Ok(json!({ "content": format!("register {} = 42", args["address"]) })),
            "dump_registers" => Ok(json!("x".repeat(5000))),
            other => Err(AgentError::ToolNotFound {
                tool_name: other.into(),
            }),
        }
    }
}

#[tokio::test]
async fn external_capabilities_are_guarded_like_builtins() {
    let registry = Arc::new(ToolRegistry::new());
    register_provider(&registry, Arc::new(Plc)).await.unwrap();

    let read = registry.get("read_register").unwrap();
    assert_eq!(read.origin(), ToolOrigin::External);
    let args = direct_arguments(read.parameter_schema(), "40001");
    assert_eq!(args, json!({ "address": 40001 }));
    let out = read.invoke_guarded(args, 1024).await;
    assert_eq!(out.content, "register 40001 = 42");

    let bad = read.invoke_guarded(json!({ "address": "forty" }), 1024).await;
    assert!(bad.is_error);
    assert!(bad.content.starts_with("Error:"));

    let dump = registry.get("dump_registers").unwrap();
    let out = dump.invoke_guarded(json!({}), 100).await;
    assert!(out.truncated);
    assert!(out.content.contains("[truncated: 4900 bytes omitted]"));
}

#[tokio::test]
async fn selector_follows_bundled_scenarios() {
    let registry = Arc::new(ToolRegistry::new());
    register_provider(&registry, Arc::new(Plc)).await.unwrap();
    let selector = ScenarioToolSelector::new(registry);
    let locales = LocaleStore::bundled("en-US").unwrap();
    let snapshot = locales.snapshot();

    let general = selector.names_for("general", snapshot.scenario("general"));
    assert_eq!(general, vec!["search_memory"]);

    // integration has no explicit list: everything registered plus baseline.
    let integration = selector.names_for("integration", snapshot.scenario("integration"));
    assert!(integration.contains(&"read_register".to_owned()));
    assert!(integration.contains(&"get_flow_templates".to_owned()));

    let tools = selector.tools_for("integration", snapshot.scenario("integration"), &ContextData::default());
    assert_eq!(tools.len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
//  Streaming
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn multiplexer_serializes_canonical_sequence() {
    let mut events = Vec::new();
    {
        let mut sink = |e: CanonicalEvent| events.push(serde_json::to_value(e).unwrap());
        let mut mux = StreamMultiplexer::new(&mut sink);
        mux.token("a");
        mux.finish(FinishReason::Stop);
    }
    assert_eq!(
        events,
        vec![
            json!({ "type": "start" }),
            json!({ "type": "text-delta", "text": "a" }),
            json!({ "type": "finish", "reason": "stop" }),
        ]
    );
}

#[test]
fn tool_content_normalisation_is_public() {
    assert_eq!(
        normalize_tool_content(&json!({ "content": ["line 1", "line 2"] })),
        "line 1\nline 2"
    );
}
