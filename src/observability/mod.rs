//! 可观测性：tracing 订阅器（默认 info，可通过 RUST_LOG 覆盖）
//!
//! 日志写 stderr，stdout 留给事件 JSON 行。

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
