//! 日志初始化
//!
//! 库代码只使用 `tracing` 宏；订阅器只在二进制入口安装一次。

use tracing_subscriber::EnvFilter;

use crate::ControlError;

/// 未设置 `RUST_LOG` 时使用的过滤指令
pub const DEFAULT_DIRECTIVE: &str = "oht=info";

/// 构造过滤器：优先使用 `RUST_LOG`，否则使用 `default_directive`
pub fn env_filter(default_directive: &str) -> Result<EnvFilter, ControlError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| ControlError::Logging(format!("{default_directive}: {e}"))),
    }
}

/// 安装全局 fmt 订阅器（重复安装返回错误）
pub fn init(default_directive: &str) -> Result<(), ControlError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive)?)
        .with_target(true)
        .try_init()
        .map_err(|e| ControlError::Logging(e.to_string()))
}
