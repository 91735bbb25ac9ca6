//! Bridge 事件：编排器输出的有序事件流，边界层序列化为 JSON 转发给调用方

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 事件来源：编排器、系统，或动态的 agent id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventSource {
    Orchestrator,
    System,
    Agent(String),
}

impl EventSource {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        EventSource::Agent(agent_id.into())
    }

    /// `ORCHESTRATOR` / `SYSTEM` 不能作为 agent id，否则反序列化时会被当成保留来源
    pub fn is_reserved(id: &str) -> bool {
        matches!(id, "ORCHESTRATOR" | "SYSTEM")
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventSource::Orchestrator => "ORCHESTRATOR",
            EventSource::System => "SYSTEM",
            EventSource::Agent(id) => id,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "ORCHESTRATOR" => EventSource::Orchestrator,
            "SYSTEM" => EventSource::System,
            _ => EventSource::Agent(s),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Token,
    Critique,
    Refinement,
    Iteration,
    PipelineStep,
    AgentStart,
    AgentComplete,
    Done,
    Error,
}

/// 单个事件；可选字段为空时不序列化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub agent: EventSource,
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satisfied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl BridgeEvent {
    pub fn new(agent: EventSource, kind: EventType) -> Self {
        let agent_id = match &agent {
            EventSource::Agent(id) => Some(id.clone()),
            _ => None,
        };
        Self {
            agent,
            kind,
            content: None,
            iteration: None,
            step: None,
            satisfied: None,
            payload: None,
            agent_id,
        }
    }

    pub fn status(content: impl Into<String>) -> Self {
        Self::new(EventSource::Orchestrator, EventType::Status).with_content(content)
    }

    pub fn iteration(iteration: u32, max_iterations: u32) -> Self {
        Self::new(EventSource::Orchestrator, EventType::Iteration)
            .with_content(format!("Iteration {}/{}", iteration, max_iterations))
            .with_iteration(iteration)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(EventSource::System, EventType::Error).with_content(content)
    }

    pub fn done(payload: impl Into<String>) -> Self {
        Self::new(EventSource::System, EventType::Done)
            .with_content("Bridge Protocol Complete")
            .with_payload(payload)
    }

    /// agent 发出的事件（token / critique / refinement / agent_start / agent_complete）
    pub fn from_agent(agent_id: &str, kind: EventType) -> Self {
        Self::new(EventSource::agent(agent_id), kind)
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_satisfied(mut self, satisfied: bool) -> Self {
        self.satisfied = Some(satisfied);
        self
    }

    /// 终止事件：done 或中止运行的 error
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventType::Done | EventType::Error)
    }
}
