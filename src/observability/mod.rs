//! 可观测性：tracing 订阅器
//!
//! 默认 info，RUST_LOG 覆盖；工具审计日志走 target `tool_audit`，安全事件走 target `security`。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
