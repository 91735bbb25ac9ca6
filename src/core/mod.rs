//! 核心编排层：错误类型、事件、流水线类型、prompt 构建、裁决提取、编排器

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;
pub mod verdict;

pub use error::{BridgeError, RegistryError, SessionError};
pub use events::{BridgeEvent, EventSource, EventType};
pub use orchestrator::{BridgeOrchestrator, EventStream, OrchestratorSettings};
pub use pipeline::{AgentRole, PipelineState, PipelineStep};
pub use verdict::{extract_verdict, Verdict};
