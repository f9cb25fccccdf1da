//! Keyword-priority scenario classifier.
//!
//! Definitional questions ("what is", "是什么") always land in `general`, so
//! conceptual questions never reach a tool-carrying scenario.  Otherwise the
//! first category, in a fixed priority order, with a keyword present in the
//! message wins.  There is no scoring.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use flowpilot_kernel::normalize;

use crate::error::IntentError;
use crate::text::word_present;

/// Conversational scenario tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioTag {
    General,
    Learning,
    Solution,
    Integration,
    Development,
    Configuration,
    Management,
}

impl ScenarioTag {
    /// Categories in classification priority order.
    pub const PRIORITY: [ScenarioTag; 6] = [
        Self::Learning,
        Self::Solution,
        Self::Integration,
        Self::Development,
        Self::Configuration,
        Self::Management,
    ];

    /// The scenario key used in locale files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Learning => "learning",
            Self::Solution => "solution",
            Self::Integration => "integration",
            Self::Development => "development",
            Self::Configuration => "configuration",
            Self::Management => "management",
        }
    }
}

impl fmt::Display for ScenarioTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioTag {
    type Err = IntentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        std::iter::once(Self::General)
            .chain(Self::PRIORITY)
            .find(|tag| tag.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| IntentError::Internal(format!("unknown scenario `{s}`")))
    }
}

const DEFINITIONAL: &[&str] = &[
    "what is", "what's", "what are", "introduce", "introduction to", "tell me about", "是什么",
    "什么是", "介绍", "简介",
];

const LEARNING: &[&str] = &[
    "learn", "tutorial", "tutorials", "how to", "how do i", "teach", "beginner", "getting started", "学习",
    "教程", "入门", "怎么", "如何",
];

const SOLUTION: &[&str] = &[
    "solution", "solutions", "architecture", "recommend", "best way", "plan for", "方案", "解决", "架构",
    "建议",
];

const INTEGRATION: &[&str] = &[
    "integrate", "integration", "connect", "mqtt", "database", "databases", "api", "apis", "plc", "modbus", "集成",
    "对接", "连接", "接入",
];

const DEVELOPMENT: &[&str] = &[
    "create", "build", "develop", "debug", "fix", "function node", "write", "开发", "创建",
    "调试", "修复", "编写",
];

const CONFIGURATION: &[&str] = &[
    "configure", "configuration", "setting", "settings", "install", "deploy", "配置", "设置", "安装", "部署",
];

const MANAGEMENT: &[&str] = &[
    "manage", "list", "delete", "organize", "export", "import", "backup", "管理", "删除", "导出",
    "导入", "备份",
];

/// Maps a message to a [`ScenarioTag`].
#[derive(Debug, Clone)]
pub struct ScenarioClassifier {
    definitional: Vec<String>,
    categories: Vec<(ScenarioTag, Vec<String>)>,
}

impl Default for ScenarioClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioClassifier {
    /// A classifier with the built-in English and Chinese vocabulary.
    pub fn new() -> Self {
        let owned = |terms: &[&str]| terms.iter().map(|t| (*t).to_owned()).collect::<Vec<_>>();
        Self {
            definitional: owned(DEFINITIONAL),
            categories: vec![
                (ScenarioTag::Learning, owned(LEARNING)),
                (ScenarioTag::Solution, owned(SOLUTION)),
                (ScenarioTag::Integration, owned(INTEGRATION)),
                (ScenarioTag::Development, owned(DEVELOPMENT)),
                (ScenarioTag::Configuration, owned(CONFIGURATION)),
                (ScenarioTag::Management, owned(MANAGEMENT)),
            ],
        }
    }

    /// Builder: add keywords to a category.  `General` extends the
    /// definitional set.
    pub fn with_keywords<I, S>(mut self, tag: ScenarioTag, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords = keywords.into_iter().map(Into::into);
        if tag == ScenarioTag::General {
            self.definitional.extend(keywords);
        } else if let Some((_, list)) = self.categories.iter_mut().find(|(t, _)| *t == tag) {
            list.extend(keywords);
        }
        self
    }

    /// Classify a message.
    pub fn classify(&self, message: &str) -> ScenarioTag {
        let text = normalize(message);

        if let Some(term) = self.definitional.iter().find(|t| word_present(&text, t)) {
            debug!(term = %term, "definitional question, using general");
            return ScenarioTag::General;
        }

        for (tag, keywords) in &self.categories {
            if let Some(term) = keywords.iter().find(|t| word_present(&text, t)) {
                debug!(scenario = %tag, term = %term, "scenario classified");
                return *tag;
            }
        }
        ScenarioTag::General
    }
}
