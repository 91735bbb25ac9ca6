//! Bridge - 多智能体命令行编排核心
//!
//! 模块划分：
//! - **agents**: 已知 Agent 签名、能力探测、注册表（发现本机安装的 Agent）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、Bridge 事件、流水线类型、prompt 构建、编排器
//! - **observability**: tracing 初始化
//! - **runtime**: 显式持有全部组件的 Bridge 运行时
//! - **session**: 会话状态机与会话管理器（子进程调用、超时、分块流）

pub mod agents;
pub mod config;
pub mod core;
pub mod observability;
pub mod runtime;
pub mod session;

pub use runtime::Bridge;
