//! 会话层：每个 agent id 一个逻辑会话，串行化调用并以分块流返回输出

pub mod executor;
pub mod manager;
pub mod mock;
pub mod state;

pub use executor::{AgentExecutor, CallOptions, ChunkStream};
pub use manager::SessionManager;
pub use mock::{ScriptedCall, ScriptedExecutor};
pub use state::{CapabilitySet, Session, SessionInfo, SessionState};
