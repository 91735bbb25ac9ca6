//! Agent 启动命令：入口文件 + 可选解释器
//!
//! 脚本型入口（.js / .mjs / .cjs）经运行时启动，其余（PATH 上的 shim 或原生二进制）直接执行。
//! 子进程 PATH 前置运行时所在目录，保证入口脚本里的 `#!/usr/bin/env node` 等能找到解释器。

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

const SCRIPT_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    /// 解释器路径；None 表示直接执行入口
    pub runtime: Option<PathBuf>,
    pub entry_point: PathBuf,
}

impl AgentCommand {
    pub fn direct(entry_point: impl Into<PathBuf>) -> Self {
        Self {
            runtime: None,
            entry_point: entry_point.into(),
        }
    }

    pub fn via_runtime(runtime: impl Into<PathBuf>, entry_point: impl Into<PathBuf>) -> Self {
        Self {
            runtime: Some(runtime.into()),
            entry_point: entry_point.into(),
        }
    }

    /// 按入口扩展名决定是否经运行时启动
    pub fn for_entry_point(entry_point: &Path, runtime: Option<&Path>) -> Self {
        let is_script = entry_point
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SCRIPT_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        match runtime {
            Some(rt) if is_script => Self::via_runtime(rt, entry_point),
            _ => Self::direct(entry_point),
        }
    }

    /// 构建 tokio Command：stdin 置空，stdout / stderr 管道，drop 时杀死子进程
    pub fn to_command(&self, args: &[String]) -> Command {
        let mut cmd = match &self.runtime {
            Some(rt) => {
                let mut c = Command::new(rt);
                c.arg(&self.entry_point);
                c
            }
            None => Command::new(&self.entry_point),
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = self.search_path() {
            cmd.env("PATH", path);
        }
        cmd
    }

    /// 日志用的简短描述（不含 prompt）
    pub fn display(&self) -> String {
        match &self.runtime {
            Some(rt) => format!("{} {}", rt.display(), self.entry_point.display()),
            None => self.entry_point.display().to_string(),
        }
    }

    fn search_path(&self) -> Option<OsString> {
        let runtime_dir = self.runtime.as_deref()?.parent()?;
        if runtime_dir.as_os_str().is_empty() {
            return None;
        }
        let current = std::env::var_os("PATH").unwrap_or_default();
        if std::env::split_paths(&current).any(|p| p == runtime_dir) {
            return None;
        }
        let mut dirs = vec![runtime_dir.to_path_buf()];
        dirs.extend(std::env::split_paths(&current));
        std::env::join_paths(dirs).ok()
    }
}
