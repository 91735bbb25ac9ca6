//! Agent 注册表：发现本机安装的 Agent、构建目录、驱动能力探测与会话初始化
//!
//! 发现从不失败：找不到的运行时或入口只会让对应 Agent 标记为不可用。
//! 目录读多写少，只在 refresh 时整体重建。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::agents::capability::parse_version;
use crate::agents::signature::FlagSpec;
use crate::agents::{AgentCommand, AgentKind, AgentSignature};
use crate::config::RegistrySection;
use crate::core::{AgentRole, RegistryError};
use crate::session::{SessionManager, SessionState};

/// `npm root -g` 的超时
const NPM_ROOT_TIMEOUT: Duration = Duration::from_secs(5);

const SYSTEM_PACKAGE_ROOTS: &[&str] = &["/usr/lib/node_modules", "/usr/local/lib/node_modules"];

/// 目录中的一个 Agent
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    /// 解析出的入口（脚本或可执行文件）
    pub path: Option<PathBuf>,
    pub runtime_path: Option<PathBuf>,
    pub is_available: bool,
    pub version: String,
    pub detected_flags: BTreeMap<String, String>,
    pub session_state: Option<SessionState>,
    pub supported_models: &'static [&'static str],
    pub default_model: &'static str,
    pub default_roles: &'static [AgentRole],
    pub flags: &'static [FlagSpec],
    pub description: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
}

impl AgentInfo {
    fn new(kind: AgentKind, sig: &'static AgentSignature, path: Option<PathBuf>, runtime: Option<&Path>) -> Self {
        Self {
            id: kind.id().to_string(),
            name: sig.name.to_string(),
            is_available: path.is_some() && runtime.is_some(),
            path,
            runtime_path: runtime.map(Path::to_path_buf),
            version: String::new(),
            detected_flags: BTreeMap::new(),
            session_state: None,
            supported_models: sig.supported_models,
            default_model: sig.default_model,
            default_roles: sig.default_roles,
            flags: sig.flags,
            description: sig.description,
            icon: sig.icon,
            color: sig.color,
        }
    }

    /// 可用时的启动命令
    pub fn command(&self) -> Option<AgentCommand> {
        if !self.is_available {
            return None;
        }
        let path = self.path.as_deref()?;
        Some(AgentCommand::for_entry_point(path, self.runtime_path.as_deref()))
    }
}

/// 目录摘要（边界层展示用）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub runtime_path: Option<PathBuf>,
    pub agents: IndexMap<String, AgentInfo>,
    pub available_count: usize,
    pub total_count: usize,
}

#[derive(Debug, Default)]
struct Catalog {
    runtime: Option<PathBuf>,
    agents: IndexMap<String, AgentInfo>,
}

pub struct AgentRegistry {
    config: RegistrySection,
    sessions: Arc<SessionManager>,
    catalog: RwLock<Catalog>,
    /// 初始化完成标记；持锁期间串行化 initialize / refresh
    initialized: Mutex<bool>,
}

impl AgentRegistry {
    pub fn new(config: RegistrySection, sessions: Arc<SessionManager>) -> Self {
        Self {
            config,
            sessions,
            catalog: RwLock::new(Catalog::default()),
            initialized: Mutex::new(false),
        }
    }

    /// 查找运行时与各 Agent 入口，重建目录；不初始化会话
    pub async fn discover(&self) {
        let runtime = find_runtime(&self.config);
        match &runtime {
            Some(path) => tracing::info!(runtime = %path.display(), "Runtime found"),
            None => tracing::warn!(runtime = %self.config.runtime, "Runtime not found; script agents unavailable"),
        }

        let roots = package_roots(&self.config).await;
        tracing::debug!(roots = ?roots, "package roots");

        let mut agents = IndexMap::new();
        for kind in AgentKind::KNOWN {
            let Some(sig) = kind.signature() else {
                continue;
            };
            let path = find_entry_point(sig, &roots, self.config.search_system);
            let info = AgentInfo::new(kind, sig, path, runtime.as_deref());
            if info.is_available {
                tracing::info!(agent_id = %info.id, path = ?info.path, "Agent discovered");
            } else {
                tracing::warn!(agent_id = %info.id, "Agent not available");
            }
            agents.insert(info.id.clone(), info);
        }

        *self.catalog.write().await = Catalog { runtime, agents };
    }

    /// 发现 + 为每个可用 Agent 探测能力并建立会话；只执行一次
    pub async fn initialize(&self) {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return;
        }
        self.discover().await;

        let candidates: Vec<(String, String, AgentCommand)> = self
            .catalog
            .read()
            .await
            .agents
            .values()
            .filter_map(|a| a.command().map(|cmd| (a.id.clone(), a.name.clone(), cmd)))
            .collect();

        for (agent_id, name, command) in candidates {
            let info = self.sessions.initialize_session(&agent_id, &name, command).await;
            let mut catalog = self.catalog.write().await;
            if let Some(agent) = catalog.agents.get_mut(&agent_id) {
                agent.version = info.version;
                agent.detected_flags = info.flags;
                agent.session_state = Some(info.state);
                if info.state != SessionState::Ready {
                    agent.is_available = false;
                }
            }
        }

        *initialized = true;
        let catalog = self.catalog.read().await;
        let available = catalog.agents.values().filter(|a| a.is_available).count();
        tracing::info!(available, total = catalog.agents.len(), "Registry initialized");
    }

    /// 关闭全部会话，从头重新发现与初始化
    pub async fn refresh(&self) {
        {
            let mut initialized = self.initialized.lock().await;
            self.sessions.close_all().await;
            *self.catalog.write().await = Catalog::default();
            *initialized = false;
        }
        self.initialize().await;
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentInfo> {
        self.catalog.read().await.agents.get(agent_id).cloned()
    }

    pub async fn get_available_agents(&self) -> Vec<AgentInfo> {
        self.catalog
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.is_available)
            .cloned()
            .collect()
    }

    /// 可用 Agent 的 id 列表
    pub async fn list_available(&self) -> Vec<String> {
        self.get_available_agents()
            .await
            .into_iter()
            .map(|a| a.id)
            .collect()
    }

    pub async fn get_all_agents(&self) -> Vec<AgentInfo> {
        self.catalog.read().await.agents.values().cloned().collect()
    }

    /// 取可用 Agent，否则说明原因
    pub async fn require_available(&self, agent_id: &str) -> Result<AgentInfo, RegistryError> {
        match self.get_agent(agent_id).await {
            Some(agent) if agent.is_available => Ok(agent),
            Some(_) => Err(RegistryError::Unavailable(agent_id.to_string())),
            None => Err(RegistryError::UnknownAgent(agent_id.to_string())),
        }
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let catalog = self.catalog.read().await;
        RegistrySnapshot {
            runtime_path: catalog.runtime.clone(),
            available_count: catalog.agents.values().filter(|a| a.is_available).count(),
            total_count: catalog.agents.len(),
            agents: catalog.agents.clone(),
        }
    }
}

/// nvm 最新版本 → PATH → 配置的固定路径
fn find_runtime(cfg: &RegistrySection) -> Option<PathBuf> {
    if cfg.search_system {
        if let Some(path) = newest_nvm_runtime(&cfg.runtime) {
            return Some(path);
        }
        if let Ok(path) = which::which(&cfg.runtime) {
            return Some(path);
        }
    }
    cfg.runtime_candidates.iter().find(|p| p.is_file()).cloned()
}

fn nvm_versions_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".nvm/versions/node"))
}

fn newest_nvm_runtime(runtime: &str) -> Option<PathBuf> {
    let pattern = nvm_versions_dir()?.join("*").join("bin").join(runtime);
    let entries = glob::glob(&pattern.to_string_lossy()).ok()?;
    entries
        .flatten()
        .filter(|p| p.is_file())
        .max_by_key(|p| nvm_version_key(p))
}

/// `.../v20.19.4/bin/node` → (20, 19, 4)；无法解析的排在最前
fn nvm_version_key(path: &Path) -> (u64, u64, u64) {
    let dir = path
        .ancestors()
        .nth(2)
        .and_then(|d| d.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let Some(version) = parse_version(dir) else {
        return (0, 0, 0);
    };
    let mut parts = version.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// 配置的额外根目录 → `npm root -g` → 系统目录 → nvm 各版本；去重且只保留存在的目录
async fn package_roots(cfg: &RegistrySection) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = cfg.package_roots.clone();
    if cfg.search_system {
        if let Some(npm_root) = npm_global_root().await {
            roots.push(npm_root);
        }
        roots.extend(SYSTEM_PACKAGE_ROOTS.iter().map(PathBuf::from));
        if let Some(versions) = nvm_versions_dir() {
            let pattern = versions.join("*").join("lib").join("node_modules");
            if let Ok(entries) = glob::glob(&pattern.to_string_lossy()) {
                roots.extend(entries.flatten());
            }
        }
    }

    let mut seen = Vec::new();
    for root in roots {
        if root.is_dir() && !seen.contains(&root) {
            seen.push(root);
        }
    }
    seen
}

async fn npm_global_root() -> Option<PathBuf> {
    let npm = which::which("npm").ok()?;
    let mut cmd = tokio::process::Command::new(npm);
    cmd.args(["root", "-g"]).kill_on_drop(true);
    match tokio::time::timeout(NPM_ROOT_TIMEOUT, cmd.output()).await {
        Ok(Ok(out)) if out.status.success() => {
            let path = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!path.is_empty()).then(|| PathBuf::from(path))
        }
        Ok(Ok(_)) | Ok(Err(_)) => None,
        Err(_) => {
            tracing::debug!("npm root -g timed out");
            None
        }
    }
}

/// 每个根目录下依次找 `<pattern>/dist/index.js`、`<pattern>/index.js`，最后按二进制名查 PATH
fn find_entry_point(sig: &AgentSignature, roots: &[PathBuf], search_path: bool) -> Option<PathBuf> {
    for root in roots {
        for pattern in sig.package_patterns {
            let package = root.join(pattern);
            for candidate in [package.join("dist").join("index.js"), package.join("index.js")] {
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }
    if search_path {
        return sig
            .binary_names
            .iter()
            .find_map(|name| which::which(name).ok());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    fn config(root: &Path, runtime: &str) -> RegistrySection {
        RegistrySection {
            runtime_candidates: vec![PathBuf::from(runtime)],
            package_roots: vec![root.to_path_buf()],
            search_system: false,
            ..RegistrySection::default()
        }
    }

    #[test]
    fn test_entry_point_search_order() {
        let dir = tempfile::tempdir().unwrap();
        let sig = AgentKind::Gemini.signature().unwrap();
        assert!(find_entry_point(sig, &[dir.path().to_path_buf()], false).is_none());

        let plain = install(dir.path(), "gemini-cli/index.js", "");
        assert_eq!(find_entry_point(sig, &[dir.path().to_path_buf()], false), Some(plain));

        let dist = install(dir.path(), "@google/gemini-cli/dist/index.js", "");
        assert_eq!(find_entry_point(sig, &[dir.path().to_path_buf()], false), Some(dist));
    }

    #[test]
    fn test_nvm_version_key_orders_numerically() {
        let older = Path::new("/h/.nvm/versions/node/v9.11.2/bin/node");
        let newer = Path::new("/h/.nvm/versions/node/v20.1.0/bin/node");
        assert!(nvm_version_key(newer) > nvm_version_key(older));
        assert_eq!(nvm_version_key(Path::new("/h/weird/bin/node")), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_discover_marks_availability() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "@qwen-code/qwen-code/dist/index.js", "");
        let registry = AgentRegistry::new(config(dir.path(), "/bin/sh"), Arc::new(SessionManager::default()));
        registry.discover().await;

        let all = registry.get_all_agents().await;
        assert_eq!(all.len(), 4);
        assert_eq!(registry.list_available().await, vec!["qwen".to_string()]);
        assert!(registry.get_agent("gemini").await.map(|a| !a.is_available).unwrap_or(false));
        assert_eq!(
            registry.require_available("claude").await.err(),
            Some(RegistryError::Unavailable("claude".to_string()))
        );
        assert_eq!(
            registry.require_available("nope").await.err(),
            Some(RegistryError::UnknownAgent("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_runtime_makes_everything_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "@qwen-code/qwen-code/dist/index.js", "");
        let registry = AgentRegistry::new(
            config(dir.path(), "/nonexistent/bridge-runtime"),
            Arc::new(SessionManager::default()),
        );
        registry.discover().await;
        assert!(registry.get_available_agents().await.is_empty());
        let qwen = registry.get_agent("qwen").await.unwrap();
        assert!(qwen.path.is_some());
        assert!(qwen.command().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_initialize_probes_and_opens_sessions() {
        let dir = tempfile::tempdir().unwrap();
        install(
            dir.path(),
            "@google/gemini-cli/dist/index.js",
            "case \"$1\" in\n  --help) echo '  --sandbox   Run sandboxed' ;;\n  --version) echo '0.1.18' ;;\nesac\n",
        );
        let sessions = Arc::new(SessionManager::default());
        let registry = AgentRegistry::new(config(dir.path(), "/bin/sh"), Arc::clone(&sessions));
        registry.initialize().await;
        registry.initialize().await;

        let gemini = registry.get_agent("gemini").await.unwrap();
        assert_eq!(gemini.version, "0.1.18");
        assert!(gemini.detected_flags.contains_key("--sandbox"));
        assert_eq!(gemini.session_state, Some(SessionState::Ready));
        assert_eq!(sessions.list_sessions().await.len(), 1);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.available_count, 1);
        assert_eq!(snapshot.total_count, 4);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["agents"]["gemini"]["isAvailable"], true);
        assert_eq!(json["agents"]["gemini"]["defaultRoles"][0], "generator");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_refresh_rebuilds_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionManager::default());
        let registry = AgentRegistry::new(config(dir.path(), "/bin/sh"), Arc::clone(&sessions));
        registry.initialize().await;
        assert!(registry.get_available_agents().await.is_empty());

        install(dir.path(), "codex-cli/index.js", "echo 1.0.0\n");
        registry.initialize().await;
        assert!(registry.get_available_agents().await.is_empty());

        registry.refresh().await;
        assert_eq!(registry.list_available().await, vec!["codex".to_string()]);
        assert_eq!(sessions.state("codex").await, Some(SessionState::Ready));
    }
}
