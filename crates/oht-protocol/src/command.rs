//! 命令与配置更新
//!
//! 使用带标签联合体代替无类型字典：未知命令在反序列化时即被拒绝，
//! 参数在进入重试循环之前通过 [`Validate`] 校验。

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Validate, check_non_negative};

/// 机器人命令（`POST command {type, parameters}`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum FirmwareCommand {
    /// 沿轨道移动到目标位置（米）
    Move { target_position: f64, speed: f64 },
    Stop,
    Pause,
    Resume,
    /// 对接到指定站点
    Dock { station_id: String },
    Undock,
    EmergencyStop,
    /// 下发速度设定（m/s, m/s²）
    SetSpeed { speed: f64, acceleration: f64 },
}

impl FirmwareCommand {
    /// 命令名称（日志与指标使用）
    pub fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Dock { .. } => "dock",
            Self::Undock => "undock",
            Self::EmergencyStop => "emergency_stop",
            Self::SetSpeed { .. } => "set_speed",
        }
    }
}

impl Validate for FirmwareCommand {
    fn validate(&self) -> Result<(), ProtocolError> {
        let caller = |e: ProtocolError| ProtocolError::InvalidCommand(e.to_string());
        match self {
            Self::Move {
                target_position,
                speed,
            } => {
                check_non_negative("target_position", *target_position).map_err(caller)?;
                check_non_negative("speed", *speed).map_err(caller)
            },
            Self::Dock { station_id } if station_id.trim().is_empty() => Err(
                ProtocolError::InvalidCommand("dock requires a station_id".into()),
            ),
            Self::SetSpeed {
                speed,
                acceleration,
            } => {
                check_non_negative("speed", *speed).map_err(caller)?;
                check_non_negative("acceleration", *acceleration).map_err(caller)
            },
            _ => Ok(()),
        }
    }
}

/// 固件配置更新（`POST config`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum ConfigUpdate {
    /// 固件侧速度上限（m/s）
    MaxSpeed(f64),
    /// 固件心跳间隔（毫秒）
    HeartbeatIntervalMs(u64),
    /// 启用/禁用 RS485 模块
    ModuleEnabled { module_id: u8, enabled: bool },
    /// 固件日志级别
    LogLevel(String),
}

impl Validate for ConfigUpdate {
    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::MaxSpeed(v) => {
                check_non_negative("max_speed", *v)
                    .map_err(|e| ProtocolError::InvalidCommand(e.to_string()))?;
                if *v == 0.0 {
                    return Err(ProtocolError::InvalidCommand("max_speed must be > 0".into()));
                }
                Ok(())
            },
            Self::HeartbeatIntervalMs(0) => Err(ProtocolError::InvalidCommand(
                "heartbeat interval must be > 0".into(),
            )),
            Self::ModuleEnabled { module_id: 0, .. } => Err(ProtocolError::InvalidCommand(
                "module id 0 is reserved".into(),
            )),
            Self::LogLevel(level) => match level.as_str() {
                "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
                other => Err(ProtocolError::InvalidCommand(format!(
                    "unknown log level {other:?}"
                ))),
            },
            _ => Ok(()),
        }
    }
}
