//! The model capability seam.
//!
//! The orchestrator never talks to a provider directly.  It asks a
//! [`ModelFactory`] for a [`ChatModel`] bound to a [`ModelConfig`] and
//! consumes the model's lazy chunk stream.  [`ProviderFactory`] is the
//! production factory; tests substitute scripted models.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::llm::client::{LlmClient, LlmClientConfig, WireFormat};
use crate::llm::types::{ChatRequest, ModelChunk};

/// A finite, non-restartable sequence of model output chunks.
pub type ChunkStream = BoxStream<'static, Result<ModelChunk>>;

/// A bound model handle.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider identifier (e.g. `"openai"`).
    fn provider(&self) -> &str;

    /// Model identifier sent to the provider.
    fn model_name(&self) -> &str;

    /// Start a streaming generation.
    ///
    /// Errors returned here (connection refused, HTTP status) happen before
    /// any chunk; errors inside the stream abort it.
    async fn generate_stream(&self, request: ChatRequest) -> Result<ChunkStream>;
}

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

/// Which provider and model a turn should use.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// API key.  Optional for local providers.
    #[serde(default)]
    pub api_key: String,
    /// Endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Sampling temperature override.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Output token ceiling override.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ModelConfig {
    /// Create a config for `provider` / `model` without credentials.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Builder: set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Builder: set the endpoint override.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Builds model handles from configuration.
pub trait ModelFactory: Send + Sync {
    /// Build a model handle.  Fails with
    /// [`AgentError::UnsupportedProvider`] or [`AgentError::MissingApiKey`].
    fn build(&self, config: &ModelConfig) -> Result<Arc<dyn ChatModel>>;
}

/// A known provider: wire format, default endpoint, and whether it needs a key.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    /// Provider identifier.
    pub name: &'static str,
    /// Wire protocol.
    pub wire: WireFormat,
    /// Default endpoint.
    pub base_url: &'static str,
    /// Whether an API key is mandatory.
    pub requires_key: bool,
}

/// Providers supported by [`ProviderFactory`].
pub const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "openai",
        wire: WireFormat::OpenAi,
        base_url: "https://api.openai.com/v1",
        requires_key: true,
    },
    ProviderSpec {
        name: "deepseek",
        wire: WireFormat::OpenAi,
        base_url: "https://api.deepseek.com/v1",
        requires_key: true,
    },
    ProviderSpec {
        name: "openrouter",
        wire: WireFormat::OpenAi,
        base_url: "https://openrouter.ai/api/v1",
        requires_key: true,
    },
    ProviderSpec {
        name: "siliconflow",
        wire: WireFormat::OpenAi,
        base_url: "https://api.siliconflow.cn/v1",
        requires_key: true,
    },
    ProviderSpec {
        name: "ollama",
        wire: WireFormat::OpenAi,
        base_url: "http://localhost:11434/v1",
        requires_key: false,
    },
    ProviderSpec {
        name: "anthropic",
        wire: WireFormat::Anthropic,
        base_url: "https://api.anthropic.com",
        requires_key: true,
    },
];

/// Look up a provider by (case-insensitive) name.
pub fn provider_spec(name: &str) -> Option<&'static ProviderSpec> {
    let name = name.trim().to_ascii_lowercase();
    PROVIDERS.iter().find(|p| p.name == name)
}

/// The production [`ModelFactory`], backed by [`LlmClient`].
#[derive(Debug, Clone, Default)]
pub struct ProviderFactory {
    request_timeout_secs: Option<u64>,
}

impl ProviderFactory {
    /// Create the factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: HTTP request timeout for created clients.
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    /// Validate `config` and resolve it into a client configuration.
    pub fn resolve(&self, config: &ModelConfig) -> Result<LlmClientConfig> {
        let spec = provider_spec(&config.provider).ok_or_else(|| AgentError::UnsupportedProvider {
            provider: config.provider.clone(),
        })?;

        if spec.requires_key && config.api_key.trim().is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: spec.name.to_owned(),
            });
        }

        if config.model.trim().is_empty() {
            return Err(AgentError::Configuration {
                reason: format!("no model configured for provider `{}`", spec.name),
            });
        }

        let mut client = LlmClientConfig::new(
            spec.name,
            spec.wire,
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone().unwrap_or_else(|| spec.base_url.to_owned()),
        );
        if let Some(max_tokens) = config.max_tokens {
            client.max_tokens = max_tokens;
        }
        if let Some(secs) = self.request_timeout_secs {
            client.timeout_secs = secs;
        }
        Ok(client)
    }
}

impl ModelFactory for ProviderFactory {
    fn build(&self, config: &ModelConfig) -> Result<Arc<dyn ChatModel>> {
        let client_config = self.resolve(config)?;
        tracing::debug!(
            provider = %client_config.provider,
            model = %client_config.default_model,
            "building model client"
        );
        Ok(Arc::new(LlmClient::new(client_config)?))
    }
}
