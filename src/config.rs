//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：项目默认 TOML → 用户配置 → 显式文件，最后用环境变量 `BRIDGE__*` 覆盖（双下划线表示嵌套，如 `BRIDGE__ORCHESTRATOR__CRITIC=claude`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub rubric: RubricSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub session: SessionSection,
}

/// [orchestrator] 段：固定循环使用的 Agent、迭代次数与超时
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 生成 / 精炼阶段使用的 agent id
    #[serde(default = "default_generator")]
    pub generator: String,
    /// 批评阶段使用的 agent id
    #[serde(default = "default_critic")]
    pub critic: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// 单次分块读取的超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// generator 汇总前序回答时，每个 Agent 回答的截断长度（字符）
    #[serde(default = "default_summary_cap_chars")]
    pub summary_cap_chars: usize,
    /// 每轮批评后由 generator 仲裁，满意即提前结束（默认关闭）
    #[serde(default)]
    pub verdict_check: bool,
}

fn default_generator() -> String {
    "gemini".to_string()
}

fn default_critic() -> String {
    "qwen".to_string()
}

fn default_max_iterations() -> u32 {
    8
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_summary_cap_chars() -> usize {
    1000
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            generator: default_generator(),
            critic: default_critic(),
            max_iterations: default_max_iterations(),
            timeout_secs: default_timeout_secs(),
            summary_cap_chars: default_summary_cap_chars(),
            verdict_check: false,
        }
    }
}

/// [rubric] 段：注入生成 prompt 的质量要求
#[derive(Debug, Clone, Deserialize)]
pub struct RubricSection {
    /// code / web / tkinter
    #[serde(default = "default_rubric_target")]
    pub target: String,
    /// polished 时额外要求排版美观
    #[serde(default = "default_rubric_quality")]
    pub quality: String,
}

fn default_rubric_target() -> String {
    "code".to_string()
}

fn default_rubric_quality() -> String {
    "polished".to_string()
}

impl Default for RubricSection {
    fn default() -> Self {
        Self {
            target: default_rubric_target(),
            quality: default_rubric_quality(),
        }
    }
}

impl RubricSection {
    /// 生成质量要求文本（按目标类型选择条目）
    pub fn render(&self) -> String {
        let mut rubric = format!("Quality requirements ({}):\n", self.target);

        match self.target.as_str() {
            "web" => rubric.push_str(
                "- Clean, modern layout with CSS variables, consistent 8px spacing.\n\
                 - Single HTML file (plus CSS/JS) or embed CSS/JS; responsive center card.\n\
                 - Clear display area, large buttons, keyboard shortcuts.\n\
                 - Error handling with non-intrusive messages.\n\
                 - No external CDN dependencies; work fully offline.\n",
            ),
            "tkinter" => rubric.push_str(
                "- Use ttk themed widgets; visually clean, consistent 8px padding.\n\
                 - Large display label/entry, legible font; buttons sized uniformly.\n\
                 - Keyboard shortcuts and Esc to clear.\n\
                 - Handle errors gracefully.\n\
                 - Self-contained single file, no third-party deps.\n",
            ),
            _ => rubric.push_str(
                "- Complete, runnable implementation in a single file when reasonable.\n\
                 - Clean, readable code with appropriate comments.\n\
                 - Proper error handling and input validation.\n\
                 - Follow language-specific best practices.\n\
                 - Include usage examples or documentation.\n",
            ),
        }

        if self.quality == "polished" {
            rubric.push_str("- Aesthetics matter: avoid cramped or noisy output; use clear structure.\n");
        }

        rubric
    }
}

/// [registry] 段：运行时与安装根目录的查找规则
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySection {
    /// 启动脚本型入口所用的解释器名
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// 运行时的固定候选路径（PATH 与版本化安装都找不到时使用）
    #[serde(default = "default_runtime_candidates")]
    pub runtime_candidates: Vec<PathBuf>,
    /// 额外的包安装根目录，优先于内置目录搜索
    #[serde(default)]
    pub package_roots: Vec<PathBuf>,
    /// 为 false 时只搜索 package_roots（测试与受控环境）
    #[serde(default = "default_true")]
    pub search_system: bool,
    #[serde(default = "default_probe_help_timeout_secs")]
    pub probe_help_timeout_secs: u64,
    #[serde(default = "default_probe_version_timeout_secs")]
    pub probe_version_timeout_secs: u64,
}

fn default_runtime() -> String {
    "node".to_string()
}

fn default_runtime_candidates() -> Vec<PathBuf> {
    vec!["/usr/bin/node".into(), "/usr/local/bin/node".into()]
}

fn default_true() -> bool {
    true
}

fn default_probe_help_timeout_secs() -> u64 {
    10
}

fn default_probe_version_timeout_secs() -> u64 {
    5
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            runtime_candidates: default_runtime_candidates(),
            package_roots: Vec::new(),
            search_system: true,
            probe_help_timeout_secs: default_probe_help_timeout_secs(),
            probe_version_timeout_secs: default_probe_version_timeout_secs(),
        }
    }
}

/// [session] 段：子进程输出的分块大小
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    256
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// 项目内的默认配置：工作目录或其上一级的 config/default.toml（取第一个存在的）
fn project_defaults() -> Option<PathBuf> {
    ["config/default.toml", "../config/default.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// 用户级配置：`<config_dir>/bridge/config.toml`（Linux 上为 ~/.config/bridge/config.toml）
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bridge").join("config.toml"))
}

/// 按层加载配置，后面的层覆盖前面的键：
///
/// 1. 项目默认 config/default.toml
/// 2. 用户级 bridge/config.toml（存在时）
/// 3. 显式传入的 config_path（必须存在，否则报错）
/// 4. 环境变量 BRIDGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let user = user_config_path().filter(|p| p.is_file());
    let layers = project_defaults().into_iter().chain(user);

    let mut builder = config::Config::builder();
    for path in layers {
        tracing::debug!(path = %path.display(), "config layer");
        builder = builder.add_source(config::File::from(path).required(false));
    }
    if let Some(path) = config_path {
        if !path.is_file() {
            return Err(config::ConfigError::NotFound(path.display().to_string()));
        }
        builder = builder.add_source(config::File::from(path));
    }
    builder
        .add_source(
            config::Environment::with_prefix("BRIDGE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
