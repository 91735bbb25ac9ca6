//! 能力探测：以 `--help` / `--version` 运行目标程序并解析输出
//!
//! 任何失败（超时、非零退出、无输出）都只得到空的或部分的 CapabilitySet，不会报错；
//! 子进程在返回前总会被等待结束或杀死。

use std::collections::BTreeMap;
use std::process::ExitStatus;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::agents::AgentCommand;
use crate::session::CapabilitySet;

/// flag 描述的最大字符数
const FLAG_DESCRIPTION_MAX_CHARS: usize = 100;

fn version_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+\.\d+\.\d+)").expect("valid version regex"))
}

fn flag_token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[\s,])(-{1,2}[A-Za-z0-9][\w-]*)").expect("valid flag regex"))
}

/// 选项列与描述列之间至少两个空格或一个制表符
fn column_split_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)(?:\s{2,}|\t)(.*)$").expect("valid split regex"))
}

#[derive(Debug)]
enum ProbeFailure {
    Timeout,
    Io(std::io::Error),
}

/// 能力探测器：持有 help / version 两个超时
#[derive(Debug, Clone)]
pub struct CapabilityProber {
    help_timeout: Duration,
    version_timeout: Duration,
}

impl Default for CapabilityProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(5))
    }
}

impl CapabilityProber {
    pub fn new(help_timeout: Duration, version_timeout: Duration) -> Self {
        Self {
            help_timeout,
            version_timeout,
        }
    }

    /// 探测能力；失败只记日志
    pub async fn probe(&self, agent_id: &str, command: &AgentCommand) -> CapabilitySet {
        let mut caps = CapabilitySet::default();

        match run_captured(command, "--help", self.help_timeout).await {
            Ok((status, text)) if status.success() && !text.trim().is_empty() => {
                caps.flags = parse_flags(&text);
                caps.help_text = text;
            }
            Ok((status, _)) => {
                tracing::warn!(agent_id = %agent_id, status = ?status.code(), "--help produced no usable output");
            }
            Err(ProbeFailure::Timeout) => {
                tracing::warn!(agent_id = %agent_id, "Timeout getting help");
            }
            Err(ProbeFailure::Io(e)) => {
                tracing::warn!(agent_id = %agent_id, "Error detecting capabilities: {}", e);
            }
        }

        match run_captured(command, "--version", self.version_timeout).await {
            Ok((status, text)) if status.success() => {
                caps.version = parse_version(&text).unwrap_or_default();
            }
            Ok((status, _)) => {
                tracing::debug!(agent_id = %agent_id, status = ?status.code(), "--version exited non-zero");
            }
            Err(e) => {
                tracing::debug!(agent_id = %agent_id, "version probe failed: {:?}", e);
            }
        }

        caps
    }
}

/// 从文本中提取第一个 x.y.z 版本号
pub fn parse_version(text: &str) -> Option<String> {
    version_pattern()
        .captures(text)
        .map(|c| c[1].to_string())
}

/// 逐行扫描以 `-` / `--` 开头的选项，描述截断到 100 字符；同一行的别名（`-m, --model`）共享描述
pub fn parse_flags(help_text: &str) -> BTreeMap<String, String> {
    let mut flags = BTreeMap::new();
    for line in help_text.lines() {
        let line = line.trim();
        if !line.starts_with('-') {
            continue;
        }
        let (head, description) = match column_split_pattern().captures(line) {
            Some(c) => (c.get(1).map_or("", |m| m.as_str()), c.get(2).map_or("", |m| m.as_str())),
            None => (line, ""),
        };
        let description: String = description
            .trim()
            .chars()
            .take(FLAG_DESCRIPTION_MAX_CHARS)
            .collect();
        for token in flag_token_pattern().captures_iter(head) {
            flags
                .entry(token[1].to_string())
                .or_insert_with(|| description.clone());
        }
    }
    flags
}

/// 运行一次并收集 stdout+stderr；超时则杀死并回收子进程
async fn run_captured(
    command: &AgentCommand,
    arg: &str,
    limit: Duration,
) -> Result<(ExitStatus, String), ProbeFailure> {
    let mut child = command
        .to_command(&[arg.to_string()])
        .spawn()
        .map_err(ProbeFailure::Io)?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let collect = async {
        let (out, err) = tokio::join!(read_all(stdout), read_all(stderr));
        let status = child.wait().await?;
        let mut text = String::from_utf8_lossy(&out?).into_owned();
        text.push_str(&String::from_utf8_lossy(&err?));
        Ok::<_, std::io::Error>((status, text))
    };

    let outcome = timeout(limit, collect).await;
    match outcome {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => {
            let _ = child.kill().await;
            Err(ProbeFailure::Io(e))
        }
        Err(_) => {
            let _ = child.kill().await;
            Err(ProbeFailure::Timeout)
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
