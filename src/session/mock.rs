//! 脚本化执行器（用于测试与演练，无需真实 Agent）
//!
//! 每次调用交给回复函数决定输出；`echo` 把 prompt 按固定长度切块原样回显。记录所有调用供断言。

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream;

use crate::core::SessionError;
use crate::session::{AgentExecutor, CallOptions, ChunkStream};

/// 一次调用的上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub agent_id: String,
    pub prompt: String,
    /// 该 agent 的第几次调用（从 1 开始）
    pub turn: usize,
}

type ReplyFn = dyn Fn(&ScriptedCall) -> Result<Vec<String>, SessionError> + Send + Sync;

/// 脚本化执行器：回复函数返回分块列表或错误
pub struct ScriptedExecutor {
    reply: Box<ReplyFn>,
    calls: Mutex<Vec<ScriptedCall>>,
    turns: Mutex<HashMap<String, usize>>,
}

impl ScriptedExecutor {
    pub fn new(
        reply: impl Fn(&ScriptedCall) -> Result<Vec<String>, SessionError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            calls: Mutex::new(Vec::new()),
            turns: Mutex::new(HashMap::new()),
        }
    }

    /// 回显 prompt，按 chunk_chars 个字符切块
    pub fn echo(chunk_chars: usize) -> Self {
        let chunk_chars = chunk_chars.max(1);
        Self::new(move |call| {
            let chars: Vec<char> = call.prompt.chars().collect();
            Ok(chars
                .chunks(chunk_chars)
                .map(|c| c.iter().collect())
                .collect())
        })
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        agent_id: &str,
        prompt: &str,
        _options: &CallOptions,
    ) -> Result<ChunkStream, SessionError> {
        let turn = {
            let mut turns = self.turns.lock().unwrap_or_else(PoisonError::into_inner);
            let turn = turns.entry(agent_id.to_string()).or_insert(0);
            *turn += 1;
            *turn
        };
        let call = ScriptedCall {
            agent_id: agent_id.to_string(),
            prompt: prompt.to_string(),
            turn,
        };
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());

        let chunks = (self.reply)(&call)?;
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_echo_chunks_prompt() {
        let exec = ScriptedExecutor::echo(4);
        let stream = exec
            .execute("gen", "hello world", &CallOptions::new(Duration::from_secs(1)))
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["hell", "o wo", "rld"]);
        assert_eq!(exec.calls()[0].turn, 1);
    }

    #[tokio::test]
    async fn test_turns_counted_per_agent() {
        let exec = ScriptedExecutor::new(|call| Ok(vec![format!("{}#{}", call.agent_id, call.turn)]));
        let opts = CallOptions::new(Duration::from_secs(1));
        for agent in ["a", "b", "a"] {
            let _ = exec.execute(agent, "p", &opts).await.unwrap();
        }
        let turns: Vec<usize> = exec.calls().iter().map(|c| c.turn).collect();
        assert_eq!(turns, vec![1, 1, 2]);
    }
}
