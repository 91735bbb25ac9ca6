//! 错误类型
//!
//! SessionError 由会话层抛出并穿过 AgentExecutor 边界；编排器把它们转换为 `error` 事件，从不让其冒泡成 panic。

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// 会话层错误：无会话、忙、超时、启动失败、读取失败、被关闭
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No session for agent: {0}")]
    NoSession(String),

    #[error("Agent {0} is busy")]
    Busy(String),

    #[error("Agent {agent_id} is not ready (state: {state})")]
    NotReady {
        agent_id: String,
        state: SessionState,
    },

    #[error("Agent {agent_id} timed out after {}s without output", timeout.as_secs_f64())]
    Timeout { agent_id: String, timeout: Duration },

    #[error("Failed to spawn {agent_id}: {source}")]
    Spawn {
        agent_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while reading {agent_id}: {source}")]
    Io {
        agent_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session for {0} was closed during the call")]
    Closed(String),
}

/// 注册表查询错误（发现本身从不失败）
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent {0} is not available (runtime or entry point missing)")]
    Unavailable(String),

    #[error("Agent id {0} is reserved for event sources")]
    ReservedId(String),
}

/// 顶层错误：配置、注册表、会话
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = SessionError::Timeout {
            agent_id: "qwen".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Agent qwen timed out after 5s without output");
    }

    #[test]
    fn test_not_ready_names_state() {
        let err = SessionError::NotReady {
            agent_id: "x".to_string(),
            state: SessionState::Closed,
        };
        assert!(err.to_string().starts_with("Agent x is not ready"));
    }

    #[test]
    fn test_bridge_error_wraps_layers() {
        let err: BridgeError = RegistryError::Unavailable("codex".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Agent codex is not available (runtime or entry point missing)"
        );
        let err: BridgeError = SessionError::Closed("qwen".to_string()).into();
        assert!(matches!(err, BridgeError::Session(SessionError::Closed(_))));
    }
}
