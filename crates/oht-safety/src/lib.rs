//! # OHT Safety
//!
//! 实时速度控制与障碍物安全区执行
//!
//! ## 模块
//!
//! - `governor`: [`SpeedGovernor`]，速度状态的唯一写入者（限速、加速度、急停、性能窗口）
//! - `enforcer`: [`SafetyZoneEnforcer`]，最近障碍物 → 安全区 → 降速 / 急停
//! - `event`: 有界安全事件日志
//!
//! ## 单向依赖
//!
//! 执行器只向控制器下发指令、只向状态机发送 [`oht_protocol::ControlTrigger`]，
//! 两者都不会反向调用执行器。

pub mod enforcer;
mod error;
pub mod event;
pub mod governor;

pub use enforcer::{EVENT_LOG_CAPACITY, SafetyAssessment, SafetyReport, SafetyZoneEnforcer};
pub use error::{SafetyError, SpeedError};
pub use event::{SafetyEvent, SafetyEventKind, Severity};
pub use governor::{
    GovernorConfig, NullSink, PerformanceMetrics, SpeedGovernor, SpeedMode, SpeedOutcome,
    SpeedSink, SpeedState,
};
