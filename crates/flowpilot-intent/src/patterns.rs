//! Built-in multilingual pattern tables.
//!
//! These tables are compiled once on first use.  Locale files can extend the
//! enhanced-regex table through `enhancedPatterns`; everything else here is
//! fixed vocabulary.

use std::sync::LazyLock;

use regex::Regex;

use crate::detector::IotScenario;

/// A compiled regex with the locale it belongs to and its weight.
#[derive(Debug)]
pub struct LocalePattern {
    /// Locale or language tag (`"en"`, `"zh"`, ...).
    pub language: &'static str,
    /// The compiled pattern.
    pub regex: Regex,
    /// Signal weight when the pattern matches.
    pub weight: f64,
}

fn compile(table: &[(&'static str, &'static str, f64)]) -> Vec<LocalePattern> {
    table
        .iter()
        .map(|&(language, pattern, weight)| LocalePattern {
            language,
            regex: Regex::new(pattern).expect("built-in intent pattern must compile"),
            weight,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Enhanced regex table
// ---------------------------------------------------------------------------

const ENHANCED: &[(&str, &str, f64)] = &[
    ("en", r"(?i)\b(?:create|build|make|generate|design|develop|set\s+up)\b.{0,40}\b(?:flows?|workflows?|automations?|pipelines?)\b", 0.9),
    ("en", r"(?i)\bnew\s+(?:flow|workflow|automation)\b", 0.8),
    ("en", r"(?i)\b(?:help\s+me|can\s+you|could\s+you|please)\b.{0,20}\b(?:create|build|make|set\s+up)\b", 0.7),
    ("en", r"(?i)\bautomate\b.{0,40}\b(?:when|every|if|whenever)\b", 0.6),
    ("zh", r"(?:创建|新建|建立|生成|搭建|制作|设计|开发|做)(?:一个|一条|个)?.{0,15}(?:流程|工作流|自动化)", 0.9),
    ("zh", r"帮我.{0,10}(?:创建|搭建|做|建|生成)", 0.7),
    ("zh", r"(?:实现|自动).{0,10}(?:监控|控制|采集|报警)", 0.6),
    ("ja", r"(?:フロー|ワークフロー).{0,15}(?:作成|作って|作りたい|構築)", 0.85),
    ("ja", r"(?:作成|構築).{0,15}(?:フロー|ワークフロー)", 0.85),
    ("ko", r"(?:플로우|워크플로우|흐름).{0,15}(?:만들|생성|작성)", 0.85),
    ("es", r"(?i)\b(?:crear|crea|construir|generar|diseñar)\b.{0,40}\b(?:flujos?|automatización)\b", 0.85),
    ("fr", r"(?i)\b(?:créer|crée|construire|générer|concevoir)\b.{0,40}\b(?:flux|workflow|automatisation)\b", 0.85),
    ("de", r"(?i)\b(?:erstelle|erstellen|baue|bauen|generiere)\b.{0,40}\b(?:flows?|fluss|workflow|automatisierung)\b", 0.85),
    ("pt", r"(?i)\b(?:criar|crie|construir|gerar)\b.{0,40}\b(?:fluxos?|automação)\b", 0.85),
    ("ru", r"(?i)(?:создать|создай|построить|сделать|сделай).{0,40}(?:поток|процесс|автоматизаци)", 0.85),
    ("it", r"(?i)\b(?:creare|crea|costruire|generare)\b.{0,40}\b(?:flussi|flusso|automazione)\b", 0.85),
];

/// The built-in enhanced-regex table.
pub static ENHANCED_PATTERNS: LazyLock<Vec<LocalePattern>> = LazyLock::new(|| compile(ENHANCED));

// ---------------------------------------------------------------------------
// Creation-intent templates
// ---------------------------------------------------------------------------

const CREATION: &[(&str, &str, f64)] = &[
    // English
    ("en", r"(?i)\bcreate\b.*\b(?:flows?|workflows?)\b", 1.0),
    ("en", r"(?i)\bbuild\b.*\b(?:flows?|workflows?)\b", 1.0),
    ("en", r"(?i)\bmake\b.*\b(?:flows?|workflows?)\b", 1.0),
    ("en", r"(?i)\bgenerate\b.*\b(?:flows?|workflows?)\b", 1.0),
    ("en", r"(?i)\bdesign\b.*\b(?:flows?|workflows?)\b", 1.0),
    ("en", r"(?i)\bset\s+up\b.*\b(?:flows?|workflows?|automations?)\b", 1.0),
    ("en", r"(?i)\b(?:create|build|make)\b.*\b(?:automations?|pipelines?)\b", 1.0),
    ("en", r"(?i)\bi\s+(?:want|need|would\s+like)\b.*\b(?:flows?|workflows?|automations?)\b", 1.0),
    // Chinese
    ("zh", r"创建.*(?:流程|工作流)", 1.0),
    ("zh", r"新建.*(?:流程|工作流)", 1.0),
    ("zh", r"建立.*(?:流程|工作流)", 1.0),
    ("zh", r"生成.*(?:流程|工作流)", 1.0),
    ("zh", r"搭建.*(?:流程|工作流|自动化)", 1.0),
    ("zh", r"制作.*(?:流程|工作流)", 1.0),
    ("zh", r"设计.*(?:流程|工作流)", 1.0),
    ("zh", r"(?:我想|我要|我需要).*(?:流程|工作流|自动化)", 1.0),
    // Japanese
    ("ja", r"フロー.*(?:作成|作って|作りたい)", 1.0),
    ("ja", r"ワークフロー.*(?:作成|作って|構築)", 1.0),
    ("ja", r"(?:作成|構築).*フロー", 1.0),
    // Korean
    ("ko", r"플로우.*(?:만들|생성)", 1.0),
    ("ko", r"워크플로우.*(?:만들|생성)", 1.0),
    ("ko", r"흐름.*(?:만들|생성)", 1.0),
    // Spanish
    ("es", r"(?i)\bcrear\b.*\bflujos?\b", 1.0),
    ("es", r"(?i)\bconstruir\b.*\bflujos?\b", 1.0),
    ("es", r"(?i)\bgenerar\b.*\bflujos?\b", 1.0),
    // French
    ("fr", r"(?i)\bcréer\b.*\bflux\b", 1.0),
    ("fr", r"(?i)\bconstruire\b.*\bflux\b", 1.0),
    ("fr", r"(?i)\bgénérer\b.*\bflux\b", 1.0),
    // German
    ("de", r"(?i)\berstellen?\b.*\b(?:flows?|fluss|workflow)\b", 1.0),
    ("de", r"(?i)\bbauen?\b.*\b(?:flows?|fluss|workflow)\b", 1.0),
    ("de", r"(?i)\bgenerieren?\b.*\b(?:flows?|fluss|workflow)\b", 1.0),
    // Portuguese
    ("pt", r"(?i)\bcriar\b.*\bfluxos?\b", 1.0),
    ("pt", r"(?i)\bconstruir\b.*\bfluxos?\b", 1.0),
    ("pt", r"(?i)\bgerar\b.*\bfluxos?\b", 1.0),
    // Russian
    ("ru", r"(?i)создать.*(?:поток|процесс)", 1.0),
    ("ru", r"(?i)построить.*(?:поток|процесс)", 1.0),
    ("ru", r"(?i)сделать.*(?:поток|процесс)", 1.0),
    // Italian
    ("it", r"(?i)\bcreare\b.*\bfluss[oi]\b", 1.0),
    ("it", r"(?i)\bcostruire\b.*\bfluss[oi]\b", 1.0),
    ("it", r"(?i)\bgenerare\b.*\bfluss[oi]\b", 1.0),
];

/// "(create-verb)...(flow-noun)" templates.
pub static CREATION_PATTERNS: LazyLock<Vec<LocalePattern>> = LazyLock::new(|| compile(CREATION));

// ---------------------------------------------------------------------------
// Fuzzy keyword vocabulary
// ---------------------------------------------------------------------------

/// Creation keywords; every space-separated part must appear in the message.
pub const FUZZY_KEYWORDS: &[&str] = &[
    "create flow",
    "create workflow",
    "create automation",
    "build flow",
    "build workflow",
    "build automation",
    "make flow",
    "make automation",
    "generate flow",
    "design flow",
    "new flow",
    "set up automation",
    "创建 流程",
    "创建 工作流",
    "新建 流程",
    "搭建 流程",
    "搭建 自动化",
    "生成 流程",
    "制作 流程",
    "设计 流程",
    "フロー 作成",
    "플로우 만들",
    "crear flujo",
    "créer flux",
    "erstellen flow",
    "criar fluxo",
    "создать поток",
    "creare flusso",
];

/// Verbs of the coarse heuristic used when semantic analysis fails.
pub const HEURISTIC_VERBS: &[&str] = &[
    "create", "build", "make", "generate", "design", "set up", "automate", "创建", "新建", "搭建",
    "生成", "制作", "设计", "作成", "만들", "crear", "créer", "erstellen", "criar", "создать",
];

/// Nouns of the coarse heuristic used when semantic analysis fails.
pub const HEURISTIC_NOUNS: &[&str] = &[
    "flow", "workflow", "automation", "pipeline", "流程", "工作流", "自动化", "フロー", "플로우",
    "flujo", "flux", "fluss", "fluxo", "поток", "flusso",
];

// ---------------------------------------------------------------------------
// IoT scenarios and context terms
// ---------------------------------------------------------------------------

/// Trigger terms per IoT scenario.
pub const IOT_TRIGGERS: &[(IotScenario, &[&str])] = &[
    (
        IotScenario::DeviceControl,
        &[
            "control", "switch", "turn on", "turn off", "relay", "actuator", "light", "控制",
            "开关", "打开", "关闭", "继电器", "灯",
        ],
    ),
    (
        IotScenario::Monitoring,
        &[
            "monitor", "temperature", "humidity", "alarm", "alert", "threshold", "监控", "监测",
            "温度", "湿度", "报警", "告警", "阈值",
        ],
    ),
    (
        IotScenario::Automation,
        &[
            "automate", "automation", "schedule", "scene", "timer", "every day", "自动化", "定时",
            "联动", "场景",
        ],
    ),
    (
        IotScenario::DataIntegration,
        &[
            "database", "sync", "etl", "collect data", "export", "store data", "数据库", "采集",
            "同步", "存储", "导出",
        ],
    ),
];

/// Platform and protocol terms feeding the context score.
pub const CONTEXT_TERMS: &[&str] = &[
    "node-red", "mqtt", "http", "websocket", "tcp", "udp", "serial", "modbus", "opc ua", "opc-ua",
    "plc", "s7", "bacnet", "coap", "zigbee", "lora", "influxdb", "mysql", "postgres", "dashboard",
    "raspberry pi", "esp32", "arduino", "home assistant", "传感器", "网关",
];
