//! Caller-supplied per-turn context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Editor state and free-form values supplied with each turn.
///
/// Context-bound tools close over the selected ids, and the values fill the
/// `{{placeholder}}` slots of scenario prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextData {
    /// The flow (tab) currently open in the editor.
    #[serde(default)]
    pub selected_flow_id: Option<String>,

    /// Nodes currently selected in the editor.
    #[serde(default)]
    pub selected_node_ids: Vec<String>,

    /// Preferred response language (e.g. `"zh-CN"`).
    #[serde(default)]
    pub language: Option<String>,

    /// Additional prompt values.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ContextData {
    /// Builder: select a flow.
    pub fn with_flow(mut self, id: impl Into<String>) -> Self {
        self.selected_flow_id = Some(id.into());
        self
    }

    /// Builder: select nodes.
    pub fn with_nodes<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_node_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the response language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Builder: add a free-form prompt value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Resolve a prompt placeholder.
    ///
    /// `lang`, `selectedFlow` and `selectedNodes` map to the typed fields;
    /// any other name is looked up in [`ContextData::extra`].
    pub fn value(&self, name: &str) -> Option<String> {
        match name {
            "lang" | "language" => self.language.clone(),
            "selectedFlow" | "selectedFlowId" => self.selected_flow_id.clone(),
            "selectedNodes" | "selectedNodeIds" if !self.selected_node_ids.is_empty() => {
                Some(self.selected_node_ids.join(", "))
            }
            _ => self.extra.get(name).cloned(),
        }
    }
}
