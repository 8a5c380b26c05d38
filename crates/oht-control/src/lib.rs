//! # OHT Control
//!
//! 控制面装配层：从 TOML 加载 [`ControlConfig`]，由 [`ServiceRegistry`]
//! 按依赖顺序构造网关、速度控制器、安全区执行器与状态机，再由
//! [`Supervisor`] 周期探测固件健康并把触发路由到状态机。
//!
//! ```no_run
//! use oht_control::{ControlConfig, ServiceRegistry, Supervisor};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), oht_control::ControlError> {
//! let config = ControlConfig::load("control.toml")?;
//! let registry = Arc::new(ServiceRegistry::connect(config)?);
//! let handle = Arc::new(Supervisor::new(registry.clone())).spawn();
//! // ...
//! handle.stop().await?;
//! registry.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod logging;
mod registry;
mod supervisor;

pub use config::ControlConfig;
pub use error::ControlError;
pub use registry::ServiceRegistry;
pub use supervisor::{Supervisor, SupervisorHandle, TickReport};
