//! 流水线类型：角色、步骤、跨步骤累积的中间结果

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::EventSource;

/// 步骤角色；未知角色统一归为 Custom（prompt 直接用原始问题）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Generator,
    Critic,
    Refiner,
    Analyzer,
    #[serde(other)]
    Custom,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Generator => "generator",
            AgentRole::Critic => "critic",
            AgentRole::Refiner => "refiner",
            AgentRole::Analyzer => "analyzer",
            AgentRole::Custom => "custom",
        }
    }

    /// 该角色的输出是否成为当前候选最终答案
    pub fn produces_answer(&self) -> bool {
        matches!(self, AgentRole::Generator | AgentRole::Refiner)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "generator" => AgentRole::Generator,
            "critic" => AgentRole::Critic,
            "refiner" => AgentRole::Refiner,
            "analyzer" => AgentRole::Analyzer,
            _ => AgentRole::Custom,
        })
    }
}

fn default_role() -> AgentRole {
    AgentRole::Generator
}

/// 流水线中的一步：由调用方提供，单次运行内不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub agent_id: String,
    #[serde(default = "default_role")]
    pub role: AgentRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl PipelineStep {
    pub fn new(agent_id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            model: None,
            settings: serde_json::Value::Null,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// 解析 `agent:role[:model]`（CLI 用）；缺省角色为 generator，保留的事件来源名不是合法 agent id
    pub fn parse_spec(spec: &str) -> Option<Self> {
        let mut parts = spec.splitn(3, ':');
        let agent_id = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty() && !EventSource::is_reserved(s))?;
        let role = parts
            .next()
            .map(|r| r.parse().unwrap_or(AgentRole::Custom))
            .unwrap_or(AgentRole::Generator);
        let mut step = Self::new(agent_id, role);
        if let Some(model) = parts.next().map(str::trim).filter(|m| !m.is_empty()) {
            step = step.with_model(model);
        }
        Some(step)
    }
}

/// 一次流水线运行的累积状态：agent id → 最近一次完整输出（按首次出现顺序），以及候选最终答案
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    responses: IndexMap<String, String>,
    final_response: String,
}

impl PipelineState {
    pub fn record(&mut self, step: &PipelineStep, output: String) {
        if step.role.produces_answer() {
            self.final_response = output.clone();
        }
        self.responses.insert(step.agent_id.clone(), output);
    }

    pub fn responses(&self) -> &IndexMap<String, String> {
        &self.responses
    }

    pub fn final_response(&self) -> &str {
        &self.final_response
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde() {
        let role: AgentRole = serde_json::from_str("\"refiner\"").unwrap();
        assert_eq!(role, AgentRole::Refiner);
        let role: AgentRole = serde_json::from_str("\"summarizer\"").unwrap();
        assert_eq!(role, AgentRole::Custom);
        assert_eq!(serde_json::to_string(&AgentRole::Analyzer).unwrap(), "\"analyzer\"");
    }

    #[test]
    fn test_step_deserialize_defaults() {
        let step: PipelineStep = serde_json::from_str(r#"{"agentId":"qwen"}"#).unwrap();
        assert_eq!(step.agent_id, "qwen");
        assert_eq!(step.role, AgentRole::Generator);
        assert!(step.model.is_none());
        assert!(step.settings.is_null());
    }

    #[test]
    fn test_parse_spec() {
        let step = PipelineStep::parse_spec("gemini:critic:gemini-2.0-flash").unwrap();
        assert_eq!(step.agent_id, "gemini");
        assert_eq!(step.role, AgentRole::Critic);
        assert_eq!(step.model.as_deref(), Some("gemini-2.0-flash"));

        let step = PipelineStep::parse_spec("qwen").unwrap();
        assert_eq!(step.role, AgentRole::Generator);

        assert_eq!(PipelineStep::parse_spec("x:poet").unwrap().role, AgentRole::Custom);
        assert!(PipelineStep::parse_spec(":critic").is_none());
        assert!(PipelineStep::parse_spec("SYSTEM:generator").is_none());
        assert!(PipelineStep::parse_spec("ORCHESTRATOR").is_none());
    }

    #[test]
    fn test_state_tracks_final_response() {
        let mut state = PipelineState::default();
        state.record(&PipelineStep::new("gen", AgentRole::Generator), "v1".into());
        state.record(&PipelineStep::new("crit", AgentRole::Critic), "meh".into());
        assert_eq!(state.final_response(), "v1");

        state.record(&PipelineStep::new("gen", AgentRole::Generator), "v2".into());
        assert_eq!(state.final_response(), "v2");
        let order: Vec<&str> = state.responses().keys().map(String::as_str).collect();
        assert_eq!(order, vec!["gen", "crit"]);
        assert_eq!(state.responses()["gen"], "v2");
    }
}
