//! Agent 执行抽象
//!
//! 编排器只通过 AgentExecutor 调用 Agent：SessionManager（真实子进程）与 ScriptedExecutor（测试 / 演练）都实现它。

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::core::SessionError;

/// 文本分块流：惰性、有限、不可重启，只能消费一次
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, SessionError>> + Send>>;

/// 单次调用参数
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// 每次分块读取的超时
    pub timeout: Duration,
    /// 可选模型提示（Agent 支持 --model 时传入）
    pub model: Option<String>,
}

impl CallOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// 立即拒绝无会话 / 忙的调用；成功时返回输出分块流
    async fn execute(
        &self,
        agent_id: &str,
        prompt: &str,
        options: &CallOptions,
    ) -> Result<ChunkStream, SessionError>;
}
