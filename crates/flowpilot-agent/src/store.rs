//! Conversation, preference and template storage seams.
//!
//! Long-term persistence is an external collaborator.  The orchestrator and
//! the baseline tools only see these traits; [`InMemoryStore`] implements
//! all three for tests and the CLI.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::llm::types::{Message, Role};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One persisted conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Record id (UUID v7, time ordered).
    pub id: Uuid,
    /// Session the message belongs to.
    pub session_id: String,
    /// Speaker.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Scenario the turn ran in.
    pub scenario: String,
    /// Free-form metadata (route, tool count, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// When the message was stored.
    pub created_at: DateTime<Utc>,
}

/// A reusable flow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTemplate {
    /// Template identifier (e.g. `iot_monitoring`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// What the template builds.
    pub description: String,
    /// Search tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl FlowTemplate {
    fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        query.split_whitespace().any(|word| {
            self.id.to_lowercase().contains(word)
                || self.name.to_lowercase().contains(word)
                || self.description.to_lowercase().contains(word)
                || self.tags.iter().any(|t| t.to_lowercase().contains(word))
        })
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Conversation history persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// History of a session, oldest first.
    async fn get_session_context(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Append one message to a session.
    async fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        scenario: &str,
        metadata: Option<Value>,
    ) -> Result<()>;

    /// Search stored messages, newest first.
    async fn search_conversations(
        &self,
        query: &str,
        scenario: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>>;
}

/// User preference lookup.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// All preferences as a JSON object.
    async fn preferences(&self) -> Result<Value>;
}

/// Flow template lookup.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Templates matching `query` (all templates when `None`).
    async fn templates(&self, query: Option<&str>) -> Result<Vec<FlowTemplate>>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Process-local store backed by [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: DashMap<String, Vec<StoredMessage>>,
    preferences: DashMap<String, Value>,
    templates: Vec<FlowTemplate>,
}

impl InMemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: seed a preference.
    pub fn with_preference(self, key: impl Into<String>, value: Value) -> Self {
        self.preferences.insert(key.into(), value);
        self
    }

    /// Builder: seed the template catalogue.
    pub fn with_templates(mut self, templates: Vec<FlowTemplate>) -> Self {
        self.templates = templates;
        self
    }

    /// Set a preference.
    pub fn set_preference(&self, key: impl Into<String>, value: Value) {
        self.preferences.insert(key.into(), value);
    }

    /// Number of stored messages in a session.
    pub fn session_len(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map_or(0, |s| s.len())
    }

    /// The default template catalogue, one entry per suggested template.
    pub fn default_templates() -> Vec<FlowTemplate> {
        let t = |id: &str, name: &str, description: &str, tags: &[&str]| FlowTemplate {
            id: id.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            tags: tags.iter().map(|s| (*s).to_owned()).collect(),
        };
        vec![
            t(
                "iot_monitoring",
                "IoT monitoring",
                "Collect sensor readings over MQTT, check thresholds and raise alerts",
                &["sensor", "mqtt", "temperature", "alarm", "监控"],
            ),
            t(
                "smart_home",
                "Smart home automation",
                "Control lights, switches and appliances from schedules or events",
                &["device", "switch", "light", "schedule", "智能家居"],
            ),
            t(
                "data_integration",
                "Data integration",
                "Move data between HTTP APIs, databases and files with transforms",
                &["http", "database", "api", "etl", "数据"],
            ),
            t(
                "basic",
                "Basic flow",
                "Inject, function and debug nodes wired together",
                &["inject", "debug", "function"],
            ),
        ]
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_session_context(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| Message {
                        role: m.role,
                        content: m.content.clone(),
                        tool_calls: Vec::new(),
                        tool_call_id: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        scenario: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        let record = StoredMessage {
            id: Uuid::now_v7(),
            session_id: session_id.to_owned(),
            role,
            content: content.to_owned(),
            scenario: scenario.to_owned(),
            metadata,
            created_at: Utc::now(),
        };
        self.sessions
            .entry(session_id.to_owned())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn search_conversations(
        &self,
        query: &str,
        scenario: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let needle = query.trim().to_lowercase();
        let mut hits: Vec<StoredMessage> = self
            .sessions
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|m| scenario.is_none_or(|s| m.scenario == s))
            .filter(|m| needle.is_empty() || m.content.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| b.id.cmp(&a.id));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl PreferenceStore for InMemoryStore {
    async fn preferences(&self) -> Result<Value> {
        let sorted: BTreeMap<String, Value> = self
            .preferences
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Ok(serde_json::to_value(sorted)?)
    }
}

#[async_trait]
impl TemplateStore for InMemoryStore {
    async fn templates(&self, query: Option<&str>) -> Result<Vec<FlowTemplate>> {
        Ok(match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => self.templates.iter().filter(|t| t.matches(q)).cloned().collect(),
            None => self.templates.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sessions_round_trip_in_order() {
        let store = InMemoryStore::new();
        store
            .append_turn("s1", Role::User, "hello", "general", None)
            .await
            .unwrap();
        store
            .append_turn("s1", Role::Assistant, "hi there", "general", Some(json!({ "route": "pure_llm" })))
            .await
            .unwrap();

        let history = store.get_session_context("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "hi there");
        assert!(store.get_session_context("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_filters_and_limits() {
        let store = InMemoryStore::new();
        for (i, scenario) in ["development", "general", "development"].iter().enumerate() {
            store
                .append_turn("s", Role::User, &format!("MQTT broker question {i}"), scenario, None)
                .await
                .unwrap();
        }

        let all = store.search_conversations("mqtt", None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].content.ends_with('2'));

        let dev = store
            .search_conversations("mqtt", Some("development"), 1)
            .await
            .unwrap();
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].scenario, "development");
    }

    #[tokio::test]
    async fn preferences_and_templates() {
        let store = InMemoryStore::new()
            .with_preference("language", json!("zh-CN"))
            .with_templates(InMemoryStore::default_templates());

        assert_eq!(store.preferences().await.unwrap()["language"], "zh-CN");
        let hits = store.templates(Some("temperature")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "iot_monitoring");
        assert_eq!(store.templates(None).await.unwrap().len(), 4);
    }
}
