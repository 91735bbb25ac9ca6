//! Agent 层：已知 Agent 签名、启动命令、能力探测、注册表

pub mod capability;
pub mod command;
pub mod registry;
pub mod signature;

pub use capability::CapabilityProber;
pub use command::AgentCommand;
pub use registry::{AgentInfo, AgentRegistry, RegistrySnapshot};
pub use signature::{AgentKind, AgentSignature};
