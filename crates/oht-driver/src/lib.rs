//! 固件 RPC 弹性层
//!
//! 本 crate 提供控制面与固件进程之间的全部容错机制：
//! - 熔断器（按操作名 + 健康探测驱动的链路熔断器）
//! - 指数退避重试（带抖动）
//! - 健康探测（超时、慢响应、连续失败门限、滚动统计）
//! - 有时限的降级数据
//! - 读缓存与指标
//!
//! # 使用场景
//!
//! 上层只通过 [`FirmwareGateway`] 访问固件；每个操作都返回
//! [`GatewayResponse`]，失败被表示而不是被抛出。

mod builder;
pub mod cache;
pub mod circuit_breaker;
pub mod command;
mod error;
pub mod fallback;
mod gateway;
pub mod health;
pub mod metrics;
pub mod retry;

pub use builder::GatewayBuilder;
pub use cache::ResponseCache;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitPermit, CircuitState,
    CircuitStatus,
};
pub use command::CommandPriority;
pub use error::GatewayError;
pub use fallback::{FallbackConfig, FallbackProvider, FallbackState, FallbackStatistics};
pub use gateway::{FirmwareGateway, GatewayConfig, GatewayResponse, GatewaySnapshot, LINK_BREAKER};
pub use health::{HealthCheck, HealthConfig, HealthProbe, HealthReport};
pub use metrics::{GatewayMetrics, MetricsSnapshot, OperationStats};
pub use retry::{RetryConfig, RetryExecutor, RetryOutcome, RetryStatistics, Retryable};
