//! 运行时装配：显式持有会话管理器、注册表与编排器
//!
//! 会话管理器只有一个实例，由这里创建并注入注册表与编排器；生命周期为 init → 运行 → close_all。

use std::path::PathBuf;
use std::sync::Arc;

use crate::agents::AgentRegistry;
use crate::config::{load_config, AppConfig};
use crate::core::{
    BridgeError, BridgeOrchestrator, EventSource, EventStream, OrchestratorSettings, PipelineStep,
    RegistryError,
};
use crate::session::{AgentExecutor, SessionManager};

pub struct Bridge {
    config: AppConfig,
    sessions: Arc<SessionManager>,
    registry: AgentRegistry,
    orchestrator: BridgeOrchestrator,
}

impl Bridge {
    pub fn new(config: AppConfig) -> Self {
        let sessions = Arc::new(SessionManager::from_config(&config));
        let registry = AgentRegistry::new(config.registry.clone(), Arc::clone(&sessions));
        let orchestrator = BridgeOrchestrator::new(
            Arc::clone(&sessions) as Arc<dyn AgentExecutor>,
            OrchestratorSettings::from_config(&config),
        );
        Self {
            config,
            sessions,
            registry,
            orchestrator,
        }
    }

    /// 读取配置并装配；配置错误向上返回，由调用方决定是否退回默认值
    pub fn from_config_path(config_path: Option<PathBuf>) -> Result<Self, BridgeError> {
        let config = load_config(config_path)?;
        Ok(Self::new(config))
    }

    /// 发现 Agent 并初始化会话（幂等）
    pub async fn init(&self) {
        self.registry.initialize().await;
    }

    pub async fn close_all(&self) {
        self.sessions.close_all().await;
        tracing::info!("All sessions closed");
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &BridgeOrchestrator {
        &self.orchestrator
    }

    /// 固定循环；max_iterations 缺省取配置
    pub fn run(
        &self,
        query: &str,
        max_iterations: Option<u32>,
        skip_critique: bool,
        context: Option<String>,
    ) -> EventStream {
        let iterations = max_iterations.unwrap_or(self.config.orchestrator.max_iterations);
        self.orchestrator.run(query, iterations, skip_critique, context)
    }

    /// 动态流水线；先确认每个步骤的 Agent 都可用
    pub async fn run_pipeline(
        &self,
        query: &str,
        steps: Vec<PipelineStep>,
        context: Option<String>,
        max_iterations: Option<u32>,
    ) -> Result<EventStream, BridgeError> {
        for step in &steps {
            if EventSource::is_reserved(&step.agent_id) {
                return Err(RegistryError::ReservedId(step.agent_id.clone()).into());
            }
            self.registry.require_available(&step.agent_id).await?;
        }
        let iterations = max_iterations.unwrap_or(self.config.orchestrator.max_iterations);
        Ok(self.orchestrator.run_pipeline(query, steps, context, iterations))
    }
}
