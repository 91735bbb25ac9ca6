//! 已知 Agent 签名与调用参数策略
//!
//! AgentKind 是封闭的变体类型：每个已知 Agent 一个分支，外加 Generic 兜底。
//! 安装位置、二进制名、展示元数据放在静态签名表里；调用参数由各分支按探测到的能力构建。

use serde::Serialize;

use crate::core::AgentRole;
use crate::session::CapabilitySet;

/// 已知 Agent 种类（按 agent id 查找）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Gemini,
    Qwen,
    Claude,
    Codex,
    /// 未知 id：只传 `-p <prompt>`
    Generic,
}

impl AgentKind {
    /// 参与发现的已知种类（顺序即目录顺序）
    pub const KNOWN: [AgentKind; 4] = [
        AgentKind::Gemini,
        AgentKind::Qwen,
        AgentKind::Claude,
        AgentKind::Codex,
    ];

    pub fn from_id(agent_id: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|kind| kind.id() == agent_id)
            .unwrap_or(AgentKind::Generic)
    }

    pub fn id(&self) -> &'static str {
        match self {
            AgentKind::Gemini => "gemini",
            AgentKind::Qwen => "qwen",
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Generic => "generic",
        }
    }

    pub fn signature(&self) -> Option<&'static AgentSignature> {
        match self {
            AgentKind::Gemini => Some(&GEMINI),
            AgentKind::Qwen => Some(&QWEN),
            AgentKind::Claude => Some(&CLAUDE),
            AgentKind::Codex => Some(&CODEX),
            AgentKind::Generic => None,
        }
    }

    /// 构建一次调用的参数（不含运行时与入口）
    pub fn build_args(&self, caps: &CapabilitySet, prompt: &str, model: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            AgentKind::Gemini => {
                // 探测失败时仍按自动批准启动，否则 CLI 会停在交互确认
                if caps.has_flag("--approval-mode") || caps.flags.is_empty() {
                    args.extend(["--approval-mode".to_string(), "yolo".to_string()]);
                }
                if caps.has_flag("--sandbox") {
                    args.push("--sandbox".to_string());
                }
            }
            AgentKind::Claude => {
                if caps.has_flag("--dangerously-skip-permissions") {
                    args.push("--dangerously-skip-permissions".to_string());
                }
            }
            AgentKind::Codex => {
                if caps.has_flag("--approval-mode") {
                    args.extend(["--approval-mode".to_string(), "full-auto".to_string()]);
                }
            }
            AgentKind::Qwen | AgentKind::Generic => {}
        }
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            if caps.has_flag("--model") {
                args.extend(["--model".to_string(), model.to_string()]);
            }
        }
        args.extend(["-p".to_string(), prompt.to_string()]);
        args
    }
}

/// 展示用 flag 的控件类型
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    Select,
    Text,
    Slider,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FlagDefault {
    Text(&'static str),
    Number(f64),
}

/// 展示用 flag 描述（前端据此渲染设置项）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSpec {
    pub name: &'static str,
    pub flag: &'static str,
    #[serde(rename = "type")]
    pub kind: FlagKind,
    pub default: FlagDefault,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub options: Option<&'static [&'static str]>,
    pub description: &'static str,
}

/// 已知 Agent 的静态签名
#[derive(Debug)]
pub struct AgentSignature {
    pub name: &'static str,
    /// 包安装根目录下的相对目录名
    pub package_patterns: &'static [&'static str],
    /// PATH 上的可执行名
    pub binary_names: &'static [&'static str],
    pub supported_models: &'static [&'static str],
    pub default_model: &'static str,
    pub default_roles: &'static [AgentRole],
    pub flags: &'static [FlagSpec],
    pub description: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
}

static GEMINI: AgentSignature = AgentSignature {
    name: "Gemini",
    package_patterns: &["@google/gemini-cli", "gemini-cli"],
    binary_names: &["gemini"],
    supported_models: &["gemini-1.5-pro", "gemini-1.5-flash", "gemini-2.0-flash"],
    default_model: "gemini-1.5-pro",
    default_roles: &[AgentRole::Generator, AgentRole::Refiner],
    flags: &[
        FlagSpec {
            name: "Approval Mode",
            flag: "--approval-mode",
            kind: FlagKind::Select,
            default: FlagDefault::Text("yolo"),
            min_value: None,
            max_value: None,
            options: Some(&["yolo", "suggest", "ask"]),
            description: "",
        },
        FlagSpec {
            name: "Allowed Tools",
            flag: "--allowed-tools",
            kind: FlagKind::Text,
            default: FlagDefault::Text(""),
            min_value: None,
            max_value: None,
            options: None,
            description: "",
        },
    ],
    description: "Google's Gemini AI for generation and refinement",
    icon: "Sparkles",
    color: "indigo",
};

static QWEN: AgentSignature = AgentSignature {
    name: "Qwen",
    package_patterns: &["@qwen-code/qwen-code", "qwen-code"],
    binary_names: &["qwen"],
    supported_models: &["qwen-plus", "qwen-turbo", "qwen-max"],
    default_model: "qwen-plus",
    default_roles: &[AgentRole::Critic, AgentRole::Analyzer],
    flags: &[FlagSpec {
        name: "MCP Servers",
        flag: "--allowed-mcp-server-names",
        kind: FlagKind::Text,
        default: FlagDefault::Text(""),
        min_value: None,
        max_value: None,
        options: None,
        description: "",
    }],
    description: "Alibaba's Qwen for critical analysis",
    icon: "Zap",
    color: "amber",
};

static CLAUDE: AgentSignature = AgentSignature {
    name: "Claude",
    package_patterns: &["@anthropic-ai/claude-cli", "claude-cli"],
    binary_names: &["claude"],
    supported_models: &["claude-3-opus", "claude-3-sonnet", "claude-3-haiku"],
    default_model: "claude-3-sonnet",
    default_roles: &[AgentRole::Generator, AgentRole::Critic],
    flags: &[
        FlagSpec {
            name: "Temperature",
            flag: "--temperature",
            kind: FlagKind::Slider,
            default: FlagDefault::Number(0.7),
            min_value: Some(0.0),
            max_value: Some(1.0),
            options: None,
            description: "",
        },
        FlagSpec {
            name: "Max Tokens",
            flag: "--max-tokens",
            kind: FlagKind::Number,
            default: FlagDefault::Number(4096.0),
            min_value: Some(1.0),
            max_value: Some(100000.0),
            options: None,
            description: "",
        },
    ],
    description: "Anthropic's Claude for balanced generation",
    icon: "Brain",
    color: "purple",
};

static CODEX: AgentSignature = AgentSignature {
    name: "Codex",
    package_patterns: &["@openai/codex-cli", "codex-cli"],
    binary_names: &["codex"],
    supported_models: &["code-davinci-002", "gpt-4-turbo"],
    default_model: "gpt-4-turbo",
    default_roles: &[AgentRole::Generator],
    flags: &[FlagSpec {
        name: "Temperature",
        flag: "--temperature",
        kind: FlagKind::Slider,
        default: FlagDefault::Number(0.2),
        min_value: Some(0.0),
        max_value: Some(1.0),
        options: None,
        description: "",
    }],
    description: "OpenAI Codex for code generation",
    icon: "Code",
    color: "emerald",
};
