//! Orchestrator configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AgentError, Result};

/// Limits and sampling parameters applied to every turn.
///
/// Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum model/tool round trips within one agent run.
    pub max_tool_cycles: u32,

    /// Wall-clock ceiling for a whole turn, in seconds.
    pub turn_timeout_secs: u64,

    /// Byte ceiling for a single tool result before truncation.
    pub tool_result_max_bytes: usize,

    /// Most recent history messages replayed into the model context.
    pub history_limit: usize,

    /// Default sampling temperature.
    pub temperature: f32,

    /// Default completion token limit.
    pub max_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_cycles: 5,
            turn_timeout_secs: 120,
            tool_result_max_bytes: 16 * 1024,
            history_limit: 20,
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AgentError::Configuration {
            reason: format!("failed to parse orchestrator config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "orchestrator config not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| AgentError::Configuration {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "orchestrator config loaded");
        Ok(config)
    }

    /// The turn ceiling as a [`Duration`].
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_tool_cycles == 0 {
            return Err(AgentError::Configuration {
                reason: "max_tool_cycles must be at least 1".into(),
            });
        }
        if self.turn_timeout_secs == 0 {
            return Err(AgentError::Configuration {
                reason: "turn_timeout_secs must be at least 1".into(),
            });
        }
        Ok(())
    }
}
