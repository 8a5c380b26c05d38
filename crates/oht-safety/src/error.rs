//! 错误类型定义

use oht_protocol::ProtocolError;
use oht_tools::ConfigError;
use thiserror::Error;

/// 速度控制错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeedError {
    /// 目标速度为负或非有限值（状态不变）
    #[error("Invalid target speed: {0}")]
    InvalidSpeed(f64),

    /// 执行机构拒绝了速度指令（状态不变）
    #[error("Speed actuator failed: {0}")]
    Actuator(String),
}

/// 安全区执行错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SafetyError {
    /// 障碍物记录非法，整批更新被拒绝
    #[error("Invalid obstacle #{index}: {source}")]
    InvalidObstacle {
        index: usize,
        #[source]
        source: ProtocolError,
    },

    /// 仍有障碍物处于临界距离内，不允许复位急停
    #[error("Unsafe to reset emergency stop: obstacle at {distance:.2} m inside critical threshold {threshold:.2} m")]
    UnsafeToReset { distance: f64, threshold: f64 },

    #[error("Safety zone configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("Speed governor error: {0}")]
    Speed(#[from] SpeedError),
}
