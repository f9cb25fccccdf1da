//! Helpers that turn a [`DetectionResult`] into conversation moves:
//! a richer generation prompt, a confirmation question, the parameters still
//! missing, and what to do when confidence is low.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flowpilot_agent::Language;

use crate::detector::{DetectionResult, IotScenario, SuggestedTemplate};

/// Below this confidence no confirmation is offered.
pub const CONFIRMATION_THRESHOLD: f64 = 0.5;
/// Below this confidence the message is treated as ordinary chat.
pub const FALLBACK_THRESHOLD: f64 = 0.3;
/// At or above this confidence flow generation proceeds.
pub const PROCEED_THRESHOLD: f64 = 0.6;

fn template_examples(template: SuggestedTemplate) -> &'static [&'static str] {
    match template {
        SuggestedTemplate::IotMonitoring => &[
            "mqtt in (sensors/temp) -> json -> switch (value > threshold) -> e-mail alert",
            "inject (every 10s) -> modbus read -> function (scale) -> dashboard gauge",
        ],
        SuggestedTemplate::SmartHome => &[
            "mqtt in (motion) -> switch (occupied) -> mqtt out (light on)",
            "inject (07:00 daily) -> change -> http request (heater on)",
        ],
        SuggestedTemplate::DataIntegration => &[
            "http in -> json -> function (map fields) -> database insert -> http response",
            "mqtt in -> join (batch of 100) -> influxdb out",
        ],
        SuggestedTemplate::Basic => &[
            "inject -> function -> debug",
            "http in -> template -> http response",
        ],
    }
}

/// Extend a flow-generation prompt with the suggested template, example
/// node chains and the detected vocabulary.
pub fn enhance_prompt(base: &str, result: &DetectionResult, language: Language) -> String {
    let (template_heading, examples_heading, keywords_heading) = match language {
        Language::English => ("Suggested template", "Example node chains", "Detected keywords"),
        Language::Chinese => ("建议模板", "示例节点链", "识别到的关键词"),
    };

    let mut prompt = base.trim_end().to_owned();
    prompt.push_str(&format!(
        "\n\n## {template_heading}: {}\n\n{examples_heading}:\n",
        result.suggested_template
    ));
    for example in template_examples(result.suggested_template) {
        prompt.push_str("- ");
        prompt.push_str(example);
        prompt.push('\n');
    }
    if !result.keywords.is_empty() {
        prompt.push_str(&format!(
            "\n[{keywords_heading}: {}]\n",
            result.keywords.join(", ")
        ));
    }
    prompt
}

/// A confirmation question for the user, or `None` when confidence is below
/// [`CONFIRMATION_THRESHOLD`].
pub fn generate_confirmation_message(result: &DetectionResult, language: Language) -> Option<String> {
    if result.confidence < CONFIRMATION_THRESHOLD {
        return None;
    }

    let scenarios: Vec<&str> = result.detected_scenarios.iter().map(|s| s.as_str()).collect();
    let template = result.suggested_template;
    let message = match (language, scenarios.is_empty()) {
        (Language::English, true) => format!(
            "It sounds like you want to create a new flow. I suggest starting from the `{template}` template. Shall I go ahead?"
        ),
        (Language::English, false) => format!(
            "It sounds like you want to create a new flow ({}). I suggest starting from the `{template}` template. Shall I go ahead?",
            scenarios.join(", ")
        ),
        (Language::Chinese, true) => {
            format!("看起来您想创建一个新流程。建议从 `{template}` 模板开始，是否继续？")
        }
        (Language::Chinese, false) => format!(
            "看起来您想创建一个新流程（{}）。建议从 `{template}` 模板开始，是否继续？",
            scenarios.join("、")
        ),
    };
    Some(message)
}

/// A parameter a flow of the detected kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRequirement {
    /// The scenario that needs it; `None` for a generic flow.
    pub scenario: Option<IotScenario>,
    pub name: String,
    pub description: String,
}

fn required_fields(scenario: Option<IotScenario>) -> &'static [(&'static str, &'static str)] {
    match scenario {
        Some(IotScenario::Monitoring) => &[
            ("data_source", "Where the readings come from (MQTT topic, Modbus address, HTTP endpoint)"),
            ("threshold", "The value that should raise an alert"),
            ("notification", "How to notify when the threshold is crossed"),
        ],
        Some(IotScenario::DeviceControl) => &[
            ("device", "The device to control"),
            ("protocol", "How the device is reached (MQTT, HTTP, Modbus)"),
            ("action", "What the flow should do to the device"),
        ],
        Some(IotScenario::Automation) => &[
            ("trigger", "What starts the automation (schedule or event)"),
            ("action", "What the automation should do"),
        ],
        Some(IotScenario::DataIntegration) => &[
            ("source", "Where the data is read from"),
            ("destination", "Where the data is written to"),
        ],
        None => &[
            ("trigger", "What starts the flow"),
            ("output", "Where the result goes"),
        ],
    }
}

fn is_provided(provided: &Map<String, Value>, name: &str) -> bool {
    match provided.get(name) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// List the required fields of every detected scenario that `provided`
/// does not supply.  A field shared by two scenarios is listed once.
pub fn collect_parameters(result: &DetectionResult, provided: &Map<String, Value>) -> Vec<ParameterRequirement> {
    let scenarios: Vec<Option<IotScenario>> = if result.detected_scenarios.is_empty() {
        vec![None]
    } else {
        result.detected_scenarios.iter().copied().map(Some).collect()
    };

    let mut missing: Vec<ParameterRequirement> = Vec::new();
    for scenario in scenarios {
        for (name, description) in required_fields(scenario) {
            if is_provided(provided, name) || missing.iter().any(|m| m.name == *name) {
                continue;
            }
            missing.push(ParameterRequirement {
                scenario,
                name: (*name).to_owned(),
                description: (*description).to_owned(),
            });
        }
    }
    missing
}

/// What to do with a detection result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FallbackAction {
    /// Confidence below [`FALLBACK_THRESHOLD`]: answer as ordinary chat.
    Fallback,
    /// Ask the user for the missing parameters before generating.
    RequestMoreInfo {
        missing: Vec<ParameterRequirement>,
    },
    /// Generate the flow from the suggested template.
    Proceed { template: SuggestedTemplate },
}

/// Pick the fallback mode for `result`.
pub fn handle_fallback(result: &DetectionResult, provided: &Map<String, Value>) -> FallbackAction {
    if result.confidence < FALLBACK_THRESHOLD {
        FallbackAction::Fallback
    } else if result.confidence < PROCEED_THRESHOLD {
        FallbackAction::RequestMoreInfo {
            missing: collect_parameters(result, provided),
        }
    } else {
        FallbackAction::Proceed {
            template: result.suggested_template,
        }
    }
}
