//! 会话状态：生命周期、能力集、对外快照
//!
//! INITIALIZING → READY ⇄ BUSY → READY；READY|BUSY → ERROR；任意状态 → CLOSED。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agents::AgentCommand;

/// 会话生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Initializing,
    Ready,
    Busy,
    Error,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }

    /// 可以接受新调用的状态（ERROR 允许重试）
    pub fn accepts_calls(&self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 探测到的能力：版本号、flag → 描述、原始帮助文本
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    pub version: String,
    pub flags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub help_text: String,
}

impl CapabilitySet {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains_key(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.version.is_empty() && self.flags.is_empty()
    }
}

/// 单个 Agent 的逻辑会话（由 SessionManager 独占）
#[derive(Debug)]
pub struct Session {
    pub agent_id: String,
    pub name: String,
    pub command: AgentCommand,
    pub state: SessionState,
    pub capabilities: CapabilitySet,
    pub last_error: String,
    /// 当前调用累计的输出
    pub response_buffer: String,
    /// 进行中调用的取消令牌，close 时触发以终止子进程
    pub(crate) active_call: Option<tokio_util::sync::CancellationToken>,
}

impl Session {
    pub(crate) fn new(agent_id: &str, name: &str, command: AgentCommand) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            name: name.to_string(),
            command,
            state: SessionState::Initializing,
            capabilities: CapabilitySet::default(),
            last_error: String::new(),
            response_buffer: String::new(),
            active_call: None,
        }
    }

    pub fn info(&self) -> SessionInfo {
        let last_error = if self.last_error.is_empty() {
            None
        } else {
            Some(self.last_error.chars().take(LAST_ERROR_PREVIEW_CHARS).collect())
        };
        SessionInfo {
            agent_id: self.agent_id.clone(),
            name: self.name.clone(),
            state: self.state,
            version: self.capabilities.version.clone(),
            flag_count: self.capabilities.flags.len(),
            flags: self.capabilities.flags.clone(),
            last_error,
        }
    }
}

/// lastError 对外展示的最大字符数
const LAST_ERROR_PREVIEW_CHARS: usize = 200;

/// 会话快照（供边界层展示）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub agent_id: String,
    pub name: String,
    pub state: SessionState,
    pub version: String,
    pub flag_count: usize,
    pub flags: BTreeMap<String, String>,
    pub last_error: Option<String>,
}
