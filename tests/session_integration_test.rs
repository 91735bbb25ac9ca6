//! 会话集成测试：用 /bin/sh 脚本充当 Agent

#[cfg(unix)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use bridge::agents::{AgentCommand, CapabilityProber};
    use bridge::core::SessionError;
    use bridge::session::{SessionManager, SessionState};
    use futures_util::StreamExt;
    use tempfile::TempDir;

    /// 脚本在 `-p` 之后的参数即 prompt；`--help` / `--version` 时不输出
    const PROMPT_PREAMBLE: &str = "while [ $# -gt 0 ]; do\n  case \"$1\" in\n    -p) shift; PROMPT=\"$1\" ;;\n  esac\n  shift\ndone\n[ -z \"$PROMPT\" ] && exit 0\n";

    fn stub(dir: &TempDir, name: &str, body: &str) -> AgentCommand {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("{}{}", PROMPT_PREAMBLE, body)).unwrap();
        AgentCommand::via_runtime("/bin/sh", path)
    }

    fn fast_prober() -> CapabilityProber {
        CapabilityProber::new(Duration::from_secs(5), Duration::from_secs(5))
    }

    async fn manager_with(agent_id: &str, command: AgentCommand, chunk_size: usize) -> SessionManager {
        let manager = SessionManager::new(fast_prober(), chunk_size);
        let info = manager.initialize_session(agent_id, agent_id, command).await;
        assert_eq!(info.state, SessionState::Ready);
        manager
    }

    fn process_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_busy_call_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = stub(&dir, "slow.sh", "printf 'partial'\nsleep 1\necho \" $PROMPT\"\n");
        let manager = manager_with("slow", cmd, 256).await;

        let mut first = manager
            .execute_query("slow", "rest", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(first.next().await.unwrap().unwrap(), "partial");

        let err = manager
            .execute_query("slow", "other", Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Busy(_)));
        assert_eq!(manager.state("slow").await, Some(SessionState::Busy));
        assert_eq!(manager.response_buffer("slow").await.as_deref(), Some("partial"));

        let mut rest = String::new();
        while let Some(chunk) = first.next().await {
            rest.push_str(&chunk.unwrap());
        }
        assert_eq!(rest, " rest\n");
        assert_eq!(manager.state("slow").await, Some(SessionState::Ready));
        assert_eq!(manager.response_buffer("slow").await.as_deref(), Some("partial rest\n"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child_and_marks_error() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file: PathBuf = dir.path().join("agent.pid");
        let body = format!("echo $$ > '{}'\nexec sleep 30\n", pid_file.display());
        let cmd = stub(&dir, "hang.sh", &body);
        let manager = manager_with("hang", cmd, 256).await;

        let mut stream = manager
            .execute_query("hang", "anything", Duration::from_millis(500))
            .await
            .unwrap();
        let result = stream.next().await.unwrap();
        assert!(matches!(result, Err(SessionError::Timeout { .. })));
        assert!(stream.next().await.is_none());

        let info = manager.session_info("hang").await.unwrap();
        assert_eq!(info.state, SessionState::Error);
        assert_eq!(info.last_error.as_deref(), Some("timeout"));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!process_alive(pid.trim()));
    }

    #[tokio::test]
    async fn test_nonzero_exit_returns_to_ready_with_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = stub(&dir, "fail.sh", "printf 'half'\necho 'boom' >&2\nexit 3\n");
        let manager = manager_with("fail", cmd, 256).await;

        let chunks: Vec<String> = manager
            .execute_query("fail", "q", Duration::from_secs(5))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), "half");

        let info = manager.session_info("fail").await.unwrap();
        assert_eq!(info.state, SessionState::Ready);
        assert!(info.last_error.unwrap_or_default().contains("boom"));
    }

    #[tokio::test]
    async fn test_close_during_call_terminates_stream() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = stub(&dir, "long.sh", "printf 'x'\nexec sleep 30\n");
        let manager = manager_with("long", cmd, 256).await;

        let mut stream = manager
            .execute_query("long", "q", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "x");

        manager.close_session("long").await;
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(matches!(next, Some(Err(SessionError::Closed(_)))));
        assert!(manager.session_info("long").await.is_none());
    }

    #[tokio::test]
    async fn test_close_all_kills_child_while_stream_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file: PathBuf = dir.path().join("idle.pid");
        let body = format!("echo $$ > '{}'\nprintf 'x'\nexec sleep 30\n", pid_file.display());
        let cmd = stub(&dir, "idle.sh", &body);
        let manager = manager_with("idle", cmd, 256).await;

        let mut stream = manager
            .execute_query("idle", "q", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "x");
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(process_alive(pid.trim()));

        // 持有流但不再轮询
        manager.close_all().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!process_alive(pid.trim()));
        assert!(manager.list_sessions().await.is_empty());
        drop(stream);
    }

    #[tokio::test]
    async fn test_dropped_stream_returns_session_to_ready() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = stub(&dir, "drop.sh", "printf 'x'\nexec sleep 30\n");
        let manager = manager_with("drop", cmd, 256).await;

        let mut stream = manager
            .execute_query("drop", "q", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(stream.next().await.is_some());
        drop(stream);

        let info = manager.session_info("drop").await.unwrap();
        assert_eq!(info.state, SessionState::Ready);
        assert_eq!(info.last_error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_multibyte_output_survives_tiny_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = stub(&dir, "utf8.sh", "printf '%s' \"$PROMPT\"\n");
        let manager = manager_with("utf8", cmd, 1).await;

        let chunks: Vec<String> = manager
            .execute_query("utf8", "编排 ok", Duration::from_secs(5))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert!(chunks.iter().all(|c| !c.contains('\u{FFFD}')));
        assert_eq!(chunks.concat(), "编排 ok");
    }

    #[tokio::test]
    async fn test_error_state_accepts_retry() {
        let dir = tempfile::tempdir().unwrap();
        let flag: PathBuf = dir.path().join("first-done");
        let body = format!(
            "if [ ! -f '{flag}' ]; then touch '{flag}'; exec sleep 30; fi\nprintf '%s' \"$PROMPT\"\n",
            flag = flag.display()
        );
        let cmd = stub(&dir, "flaky.sh", &body);
        let manager = manager_with("flaky", cmd, 256).await;

        let mut stream = manager
            .execute_query("flaky", "q", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(Err(SessionError::Timeout { .. }))));
        drop(stream);
        assert_eq!(manager.state("flaky").await, Some(SessionState::Error));

        let out: Vec<String> = manager
            .execute_query("flaky", "again", Duration::from_secs(5))
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(out.concat(), "again");
        assert_eq!(manager.state("flaky").await, Some(SessionState::Ready));
    }
}
