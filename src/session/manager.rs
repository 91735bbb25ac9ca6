//! 会话管理器：每个 agent id 一个逻辑会话
//!
//! 会话并不常驻子进程：每次调用都启动新的子进程，但同一 agent id 的调用由 BUSY 状态串行化。
//! BUSY 是唯一的互斥手段，不排队：忙时的第二次调用直接失败，不改动状态与缓冲。
//! 输出按固定大小分块读取，每块读取受超时约束；超时即杀死并回收子进程，会话置为 ERROR。

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::RwLock;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentCommand, AgentKind, CapabilityProber};
use crate::config::AppConfig;
use crate::core::SessionError;
use crate::session::{
    AgentExecutor, CallOptions, ChunkStream, Session, SessionInfo, SessionState,
};

type SessionHandle = Arc<Mutex<Session>>;

/// 会话记录只在同步的短临界区内访问，从不跨 await 持有
fn lock(handle: &Mutex<Session>) -> MutexGuard<'_, Session> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 会话管理器：显式持有、注入到注册表与编排器
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    prober: CapabilityProber,
    chunk_size: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(CapabilityProber::default(), 256)
    }
}

impl SessionManager {
    pub fn new(prober: CapabilityProber, chunk_size: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            prober,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let prober = CapabilityProber::new(
            Duration::from_secs(cfg.registry.probe_help_timeout_secs),
            Duration::from_secs(cfg.registry.probe_version_timeout_secs),
        );
        Self::new(prober, cfg.session.chunk_size)
    }

    /// 创建会话（INITIALIZING）→ 探测能力 → READY；已有同 id 会话时先关闭旧会话
    pub async fn initialize_session(
        &self,
        agent_id: &str,
        name: &str,
        command: AgentCommand,
    ) -> SessionInfo {
        self.close_session(agent_id).await;

        let handle = Arc::new(Mutex::new(Session::new(agent_id, name, command.clone())));
        self.sessions
            .write()
            .await
            .insert(agent_id.to_string(), Arc::clone(&handle));

        let caps = self.prober.probe(agent_id, &command).await;

        let mut session = lock(&handle);
        if session.state == SessionState::Initializing {
            session.state = SessionState::Ready;
        }
        tracing::info!(
            agent_id = %agent_id,
            version = %caps.version,
            flags = caps.flags.len(),
            "Initialized session"
        );
        session.capabilities = caps;
        session.info()
    }

    /// 执行一次查询：立即完成 READY→BUSY 转换，返回输出分块流
    pub async fn execute_query(
        &self,
        agent_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ChunkStream, SessionError> {
        self.execute_query_with_model(agent_id, prompt, timeout, None)
            .await
    }

    pub async fn execute_query_with_model(
        &self,
        agent_id: &str,
        prompt: &str,
        timeout: Duration,
        model: Option<&str>,
    ) -> Result<ChunkStream, SessionError> {
        let handle = self
            .sessions
            .read()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| SessionError::NoSession(agent_id.to_string()))?;

        let (command, args, cancel) = {
            let mut session = lock(&handle);
            match session.state {
                SessionState::Busy => return Err(SessionError::Busy(agent_id.to_string())),
                state if !state.accepts_calls() => {
                    return Err(SessionError::NotReady {
                        agent_id: agent_id.to_string(),
                        state,
                    })
                }
                _ => {}
            }
            session.state = SessionState::Busy;
            session.response_buffer.clear();
            let cancel = CancellationToken::new();
            session.active_call = Some(cancel.clone());
            let args = AgentKind::from_id(agent_id).build_args(&session.capabilities, prompt, model);
            (session.command.clone(), args, cancel)
        };

        tracing::debug!(
            agent_id = %agent_id,
            command = %command.display(),
            "Executing ... -p <prompt>"
        );

        let call = ActiveCall {
            handle,
            agent_id: agent_id.to_string(),
            finished: false,
        };
        Ok(Box::pin(chunk_stream(
            call,
            command,
            args,
            timeout,
            self.chunk_size,
            cancel,
        )))
    }

    pub async fn session_info(&self, agent_id: &str) -> Option<SessionInfo> {
        let handle = self.sessions.read().await.get(agent_id).cloned()?;
        let info = lock(&handle).info();
        Some(info)
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut infos: Vec<SessionInfo> = handles.iter().map(|h| lock(h).info()).collect();
        infos.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        infos
    }

    pub async fn state(&self, agent_id: &str) -> Option<SessionState> {
        let handle = self.sessions.read().await.get(agent_id).cloned()?;
        let state = lock(&handle).state;
        Some(state)
    }

    /// 当前（或最近一次）调用累计的输出
    pub async fn response_buffer(&self, agent_id: &str) -> Option<String> {
        let handle = self.sessions.read().await.get(agent_id).cloned()?;
        let buffer = lock(&handle).response_buffer.clone();
        Some(buffer)
    }

    /// 终止进行中的子进程并移除会话；幂等。杀死子进程由监督任务完成，不等待流被轮询
    pub async fn close_session(&self, agent_id: &str) {
        let removed = self.sessions.write().await.remove(agent_id);
        if let Some(handle) = removed {
            let mut session = lock(&handle);
            session.state = SessionState::Closed;
            if let Some(cancel) = session.active_call.take() {
                cancel.cancel();
            }
            tracing::info!(agent_id = %agent_id, "Closed session");
        }
    }

    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.close_session(&id).await;
        }
    }
}

#[async_trait]
impl AgentExecutor for SessionManager {
    async fn execute(
        &self,
        agent_id: &str,
        prompt: &str,
        options: &CallOptions,
    ) -> Result<ChunkStream, SessionError> {
        self.execute_query_with_model(agent_id, prompt, options.timeout, options.model.as_deref())
            .await
    }
}

/// 进行中调用的状态守卫：流被提前丢弃时把会话恢复为 READY（lastError = "cancelled"）
struct ActiveCall {
    handle: SessionHandle,
    agent_id: String,
    finished: bool,
}

impl ActiveCall {
    fn append(&self, text: &str) {
        lock(&self.handle).response_buffer.push_str(text);
    }

    fn settle(&mut self, state: SessionState, last_error: Option<String>) {
        self.finished = true;
        let mut session = lock(&self.handle);
        session.active_call = None;
        if let Some(err) = last_error {
            session.last_error = err;
        }
        // 已关闭的会话保持 CLOSED
        if session.state != SessionState::Closed {
            session.state = state;
        }
    }

    fn complete(&mut self, stderr: Option<String>) {
        self.settle(SessionState::Ready, stderr);
    }

    fn fail(&mut self, error: String) {
        self.settle(SessionState::Error, Some(error));
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(agent_id = %self.agent_id, "call dropped before completion");
            self.settle(SessionState::Ready, Some("cancelled".to_string()));
        }
    }
}

/// 子进程监督：正常退出时返回状态；kill 令牌触发（关闭会话、超时、流被丢弃）时杀死并回收
async fn supervise(mut child: Child, kill: CancellationToken) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => return status,
        _ = kill.cancelled() => {}
    }
    let _ = child.kill().await;
    child.wait().await
}

fn joined(result: Result<std::io::Result<ExitStatus>, JoinError>) -> std::io::Result<ExitStatus> {
    result.unwrap_or_else(|e| Err(std::io::Error::other(e)))
}

fn chunk_stream(
    mut call: ActiveCall,
    command: AgentCommand,
    args: Vec<String>,
    timeout: Duration,
    chunk_size: usize,
    cancel: CancellationToken,
) -> impl futures_util::Stream<Item = Result<String, SessionError>> + Send + 'static {
    async_stream::stream! {
        let agent_id = call.agent_id.clone();

        let mut child = match command.to_command(&args).spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(agent_id = %agent_id, "spawn failed: {}", source);
                call.fail(source.to_string());
                yield Err(SessionError::Spawn { agent_id, source });
                return;
            }
        };

        // stderr 并发排空，避免子进程写满管道后阻塞
        let stderr_task = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });
        let stdout = child.stdout.take();

        // 子进程归监督任务所有：close_session 取消父令牌即可杀死，不依赖流是否被轮询
        let kill = cancel.child_token();
        let _kill_on_drop = kill.clone().drop_guard();
        let mut exit = tokio::spawn(supervise(child, kill.clone()));

        let mut stdout = match stdout {
            Some(stdout) => stdout,
            None => {
                kill.cancel();
                let _ = exit.await;
                call.fail("stdout not captured".to_string());
                yield Err(SessionError::Io {
                    agent_id,
                    source: std::io::Error::other("stdout not captured"),
                });
                return;
            }
        };

        let mut decoder = Utf8Decoder::default();
        let mut buf = vec![0u8; chunk_size];
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => None,
                r = tokio::time::timeout(timeout, stdout.read(&mut buf)) => Some(r),
            };
            match read {
                None => {
                    let _ = (&mut exit).await;
                    call.settle(SessionState::Closed, Some("closed".to_string()));
                    yield Err(SessionError::Closed(agent_id));
                    return;
                }
                Some(Err(_)) => {
                    kill.cancel();
                    let _ = (&mut exit).await;
                    tracing::warn!(agent_id = %agent_id, timeout_secs = timeout.as_secs_f64(), "chunk read timed out, child killed");
                    call.fail("timeout".to_string());
                    yield Err(SessionError::Timeout { agent_id, timeout });
                    return;
                }
                Some(Ok(Err(source))) => {
                    kill.cancel();
                    let _ = (&mut exit).await;
                    call.fail(source.to_string());
                    yield Err(SessionError::Io { agent_id, source });
                    return;
                }
                Some(Ok(Ok(0))) => break,
                Some(Ok(Ok(n))) => {
                    let text = decoder.push(&buf[..n]);
                    if !text.is_empty() {
                        call.append(&text);
                        yield Ok(text);
                    }
                }
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            call.append(&tail);
            yield Ok(tail);
        }

        // stdout 关闭后子进程应很快退出；仍受同一超时约束
        let waited = tokio::time::timeout(timeout, &mut exit).await.map(joined);
        match waited {
            Err(_) => {
                kill.cancel();
                let _ = exit.await;
                tracing::warn!(agent_id = %agent_id, "child did not exit after closing stdout, killed");
                call.fail("timeout".to_string());
                yield Err(SessionError::Timeout { agent_id, timeout });
            }
            Ok(Ok(status)) if status.success() => call.complete(None),
            Ok(Ok(status)) => {
                let stderr = match stderr_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => Vec::new(),
                };
                let stderr = String::from_utf8_lossy(&stderr).into_owned();
                let preview: String = stderr.chars().take(200).collect();
                tracing::error!(agent_id = %agent_id, code = ?status.code(), "{} error: {}", agent_id, preview);
                // 单轮失败不让会话搁浅：保留部分输出，回到 READY
                call.complete(Some(stderr));
            }
            Ok(Err(source)) => {
                call.fail(source.to_string());
                yield Err(SessionError::Io { agent_id, source });
            }
        }
    }
}

/// 增量 UTF-8 解码：跨块截断的多字节序列留到下一块
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_decoder_carries_split_sequence() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "编排".as_bytes();
        assert_eq!(decoder.push(&bytes[..2]), "");
        assert_eq!(decoder.push(&bytes[2..4]), "编");
        assert_eq!(decoder.push(&bytes[4..]), "排");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.push(&[0xe7]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_execute_without_session_fails() {
        let manager = SessionManager::default();
        let err = manager
            .execute_query("ghost", "hi", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::NoSession(id) if id == "ghost"));
        assert!(manager.state("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_moves_session_to_error() {
        let manager = SessionManager::default();
        manager
            .initialize_session("ghost", "Ghost", AgentCommand::direct("/nonexistent/bridge-agent"))
            .await;
        assert_eq!(manager.state("ghost").await, Some(SessionState::Ready));

        let mut stream = manager
            .execute_query("ghost", "hi", Duration::from_secs(1))
            .await
            .unwrap();
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(SessionError::Spawn { .. })));
        assert!(stream.next().await.is_none());
        assert_eq!(manager.state("ghost").await, Some(SessionState::Error));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let manager = SessionManager::default();
        manager
            .initialize_session("ghost", "Ghost", AgentCommand::direct("/nonexistent/bridge-agent"))
            .await;
        manager.close_session("ghost").await;
        manager.close_session("ghost").await;
        manager.close_all().await;
        assert!(manager.session_info("ghost").await.is_none());
    }
}
