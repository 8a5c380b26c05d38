//! 固件响应载荷
//!
//! 对应固件 RPC 的 `GET status` / `GET telemetry` / `GET safety` /
//! `GET modules` 与命令确认。字段命名与固件 JSON 保持一致。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ProtocolError, Validate, check_non_negative};

/// 将不可信 JSON 解码并校验为类型化载荷
///
/// 反序列化失败返回 [`ProtocolError::Malformed`]，字段越界返回
/// [`ProtocolError::InvalidValue`]。
pub fn decode<T>(value: Value) -> Result<T, ProtocolError>
where
    T: DeserializeOwned + Validate,
{
    let payload: T =
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    payload.validate()?;
    Ok(payload)
}

/// 平面坐标（米）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// 机器人运行状态（`GET status`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotStatus {
    pub robot_id: String,
    /// 固件报告的运行状态（idle / moving / docking / emergency_stop ...）
    pub status: String,
    #[serde(default)]
    pub position: Option<Position>,
    /// 电量百分比（0-100）
    #[serde(default)]
    pub battery_level: Option<f64>,
    /// 控制器温度（°C）
    #[serde(default)]
    pub temperature: Option<f64>,
    /// 是否为降级模式下的合成数据
    #[serde(default)]
    pub fallback_mode: bool,
}

impl Validate for RobotStatus {
    fn validate(&self) -> Result<(), ProtocolError> {
        if self.robot_id.trim().is_empty() {
            return Err(ProtocolError::invalid("robot_id", "empty"));
        }
        if self.status.trim().is_empty() {
            return Err(ProtocolError::invalid("status", "empty"));
        }
        if let Some(level) = self.battery_level {
            if !(0.0..=100.0).contains(&level) {
                return Err(ProtocolError::invalid(
                    "battery_level",
                    format!("{level} out of range 0..=100"),
                ));
            }
        }
        if let Some(pos) = self.position {
            if !pos.x.is_finite() || !pos.y.is_finite() {
                return Err(ProtocolError::invalid("position", "not finite"));
            }
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() {
                return Err(ProtocolError::invalid("temperature", "not finite"));
            }
        }
        Ok(())
    }
}

/// 运动/传感遥测（`GET telemetry`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// 电机转速（rpm）
    pub motor_speed: f64,
    /// 电机温度（°C）
    pub motor_temperature: f64,
    pub dock_status: String,
    pub safety_status: String,
    #[serde(default)]
    pub fallback_mode: bool,
}

impl Validate for Telemetry {
    fn validate(&self) -> Result<(), ProtocolError> {
        check_non_negative("motor_speed", self.motor_speed)?;
        if !self.motor_temperature.is_finite() {
            return Err(ProtocolError::invalid("motor_temperature", "not finite"));
        }
        Ok(())
    }
}

/// 安全子系统状态（`GET safety`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyStatus {
    pub estop_active: bool,
    /// normal / warning / fault
    pub safety_status: String,
    #[serde(default)]
    pub fallback_mode: bool,
}

impl Validate for SafetyStatus {
    fn validate(&self) -> Result<(), ProtocolError> {
        match self.safety_status.as_str() {
            "normal" | "warning" | "fault" => Ok(()),
            other => Err(ProtocolError::invalid(
                "safety_status",
                format!("unknown value {other:?}"),
            )),
        }
    }
}

/// 模块状态（`GET modules/{id}`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub module_id: u8,
    pub name: String,
    /// online / warning / error / offline
    pub status: String,
    #[serde(default)]
    pub health: Option<f64>,
}

impl Validate for ModuleStatus {
    fn validate(&self) -> Result<(), ProtocolError> {
        if self.module_id == 0 {
            return Err(ProtocolError::invalid("module_id", "0 is reserved"));
        }
        if let Some(h) = self.health {
            if !(0.0..=1.0).contains(&h) {
                return Err(ProtocolError::invalid("health", format!("{h} out of range 0..=1")));
            }
        }
        Ok(())
    }
}

impl Validate for Vec<ModuleStatus> {
    fn validate(&self) -> Result<(), ProtocolError> {
        self.iter().try_for_each(Validate::validate)
    }
}

/// 命令执行确认（`POST command` / `POST emergency-stop` / `POST config`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl Validate for CommandAck {
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// 配置与诊断数据按原样透传（仅要求是 JSON 对象）
impl Validate for Value {
    fn validate(&self) -> Result<(), ProtocolError> {
        if self.is_object() {
            Ok(())
        } else {
            Err(ProtocolError::Malformed("expected a JSON object".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_robot_status() {
        let status: RobotStatus = decode(json!({
            "robot_id": "OHT-50-001",
            "status": "idle",
            "position": {"x": 150.5, "y": 200.3},
            "battery_level": 87,
            "temperature": 42.5
        }))
        .unwrap();

        assert_eq!(status.robot_id, "OHT-50-001");
        assert_eq!(status.position, Some(Position { x: 150.5, y: 200.3 }));
        assert!(!status.fallback_mode);
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let err = decode::<RobotStatus>(json!({"status": "idle"})).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_decode_rejects_out_of_range_battery() {
        let err = decode::<RobotStatus>(json!({
            "robot_id": "OHT-50-001",
            "status": "idle",
            "battery_level": 140
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidValue {
                field: "battery_level",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_safety_status_unknown_value() {
        let err = decode::<SafetyStatus>(json!({
            "estop_active": false,
            "safety_status": "maybe"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("safety_status"));
    }

    #[test]
    fn test_telemetry_negative_speed_rejected() {
        let err = decode::<Telemetry>(json!({
            "motor_speed": -1.0,
            "motor_temperature": 40.0,
            "dock_status": "ready",
            "safety_status": "normal"
        }))
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { field: "motor_speed", .. }));
    }

    #[test]
    fn test_module_list_validation() {
        let modules: Vec<ModuleStatus> = decode(json!([
            {"module_id": 2, "name": "power", "status": "online", "health": 0.9},
            {"module_id": 3, "name": "safety", "status": "warning"}
        ]))
        .unwrap();
        assert_eq!(modules.len(), 2);

        let err = decode::<Vec<ModuleStatus>>(json!([
            {"module_id": 0, "name": "bad", "status": "online"}
        ]))
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { field: "module_id", .. }));
    }

    #[test]
    fn test_opaque_value_must_be_object() {
        assert!(decode::<Value>(json!({"a": 1})).is_ok());
        assert!(decode::<Value>(json!([1, 2])).is_err());
    }
}
