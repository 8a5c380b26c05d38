//! # OHT Protocol
//!
//! 固件 RPC 协议定义（无传输层依赖）
//!
//! ## 模块
//!
//! - `payload`: 固件响应载荷（状态、遥测、安全、模块）及校验
//! - `command`: 命令与配置更新的带标签联合体
//! - `obstacle`: 感知管线输出的障碍物记录
//! - `trigger`: 控制面内部单向消息（网关/安全 → 状态机）
//!
//! ## 不可信输入
//!
//! 固件返回的所有 JSON 都视为不可信数据，必须经过 [`decode`] 反序列化并
//! 通过 [`Validate`] 校验之后才能被上层使用。校验失败与传输失败同等对待
//! （计入熔断器失败、可被重试）。

pub mod command;
pub mod obstacle;
pub mod payload;
pub mod trigger;

pub use command::{ConfigUpdate, FirmwareCommand};
pub use obstacle::{Obstacle, ObstacleKind};
pub use payload::{
    CommandAck, ModuleStatus, Position, RobotStatus, SafetyStatus, Telemetry, decode,
};
pub use trigger::ControlTrigger;

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// JSON 结构不符合预期
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// 字段值超出允许范围
    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// 命令或配置参数非法（调用方输入错误，不可重试）
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl ProtocolError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// 是否由调用方输入导致（不应进入重试循环）
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidCommand(_))
    }
}

/// 载荷/命令校验
pub trait Validate {
    fn validate(&self) -> Result<(), ProtocolError>;
}

/// 校验有限非负数
pub(crate) fn check_non_negative(field: &'static str, value: f64) -> Result<(), ProtocolError> {
    if !value.is_finite() {
        return Err(ProtocolError::invalid(field, "not a finite number"));
    }
    if value < 0.0 {
        return Err(ProtocolError::invalid(field, format!("{value} is negative")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::invalid("battery_level", "120 out of range");
        assert_eq!(
            err.to_string(),
            "Invalid value for field battery_level: 120 out of range"
        );

        let err = ProtocolError::Malformed("missing field `status`".into());
        assert!(err.to_string().contains("Malformed payload"));
    }

    #[test]
    fn test_caller_error_classification() {
        assert!(ProtocolError::InvalidCommand("bad".into()).is_caller_error());
        assert!(!ProtocolError::Malformed("bad".into()).is_caller_error());
        assert!(!ProtocolError::invalid("x", "y").is_caller_error());
    }

    #[test]
    fn test_check_non_negative() {
        assert!(check_non_negative("speed", 0.0).is_ok());
        assert!(check_non_negative("speed", 1.5).is_ok());
        assert!(check_non_negative("speed", -0.1).is_err());
        assert!(check_non_negative("speed", f64::NAN).is_err());
        assert!(check_non_negative("speed", f64::INFINITY).is_err());
    }
}
