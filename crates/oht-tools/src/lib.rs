//! # OHT Tools - 共享工具与配置结构
//!
//! **依赖原则**: 不依赖任何其他 `oht-*` crate，避免循环依赖
//!
//! ## 包含模块
//!
//! - `clock` - 时钟抽象（真实时钟 / 测试用手动时钟）
//! - `statistics` - 有界环形缓冲与延迟统计（纯函数）
//! - `safety` - 速度限制与安全区配置（只读结构）

pub mod clock;
pub mod safety;
pub mod statistics;

// 重新导出常用类型
pub use clock::{Clock, ManualClock, SystemClock};
pub use safety::{ConfigError, SafetyZone, SafetyZoneTable, SpeedLimits};
pub use statistics::{LatencyStatistics, RingBuffer};
