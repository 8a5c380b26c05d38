//! # 安全配置
//!
//! 速度限制与障碍物安全区表（只读结构，由配置文件加载）

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 配置校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration value {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 速度限制
///
/// 不变量：所有值 > 0，`emergency_speed < safety_speed < max_speed`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedLimits {
    /// 最大速度（m/s）
    pub max_speed: f64,
    /// 最大加速度（m/s²）
    pub max_acceleration: f64,
    /// 最大减速度（m/s²）
    pub max_deceleration: f64,
    /// 安全模式限速（m/s）
    pub safety_speed: f64,
    /// 紧急模式限速（m/s）
    pub emergency_speed: f64,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            max_speed: 2.0,
            max_acceleration: 1.0,
            max_deceleration: 2.0,
            safety_speed: 0.5,
            emergency_speed: 0.1,
        }
    }
}

impl SpeedLimits {
    /// 校验不变量
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("max_speed", self.max_speed),
            ("max_acceleration", self.max_acceleration),
            ("max_deceleration", self.max_deceleration),
            ("safety_speed", self.safety_speed),
            ("emergency_speed", self.emergency_speed),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("speed.{name}"),
                    format!("{value} must be a positive number"),
                ));
            }
        }
        if self.safety_speed >= self.max_speed {
            return Err(ConfigError::invalid(
                "speed.safety_speed",
                "must be below max_speed",
            ));
        }
        if self.emergency_speed >= self.safety_speed {
            return Err(ConfigError::invalid(
                "speed.emergency_speed",
                "must be below safety_speed",
            ));
        }
        Ok(())
    }
}

/// 单个安全区：障碍物距离 ≤ `max_distance` 时速度不得超过 `speed_cap`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyZone {
    pub name: String,
    /// 区域外沿（米）
    pub max_distance: f64,
    /// 区域限速（m/s）
    pub speed_cap: f64,
}

impl SafetyZone {
    pub fn new(name: impl Into<String>, max_distance: f64, speed_cap: f64) -> Self {
        Self {
            name: name.into(),
            max_distance,
            speed_cap,
        }
    }
}

/// 安全区表
///
/// 按 `max_distance` 升序保存；距离越近限速越严格。最小的
/// `max_distance` 即为临界阈值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SafetyZone>", into = "Vec<SafetyZone>")]
pub struct SafetyZoneTable {
    zones: Vec<SafetyZone>,
}

impl SafetyZoneTable {
    /// 构造并校验安全区表（输入顺序无关）
    pub fn new(mut zones: Vec<SafetyZone>) -> Result<Self, ConfigError> {
        if zones.is_empty() {
            return Err(ConfigError::invalid("safety_zones", "at least one zone required"));
        }
        for zone in &zones {
            if !zone.max_distance.is_finite() || zone.max_distance <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("safety_zones.{}.max_distance", zone.name),
                    "must be a positive number",
                ));
            }
            if !zone.speed_cap.is_finite() || zone.speed_cap < 0.0 {
                return Err(ConfigError::invalid(
                    format!("safety_zones.{}.speed_cap", zone.name),
                    "must be a non-negative number",
                ));
            }
        }
        zones.sort_by(|a, b| a.max_distance.total_cmp(&b.max_distance));
        for pair in zones.windows(2) {
            if pair[0].max_distance == pair[1].max_distance {
                return Err(ConfigError::invalid(
                    format!("safety_zones.{}", pair[1].name),
                    "duplicate max_distance",
                ));
            }
            if pair[0].speed_cap > pair[1].speed_cap {
                return Err(ConfigError::invalid(
                    format!("safety_zones.{}", pair[0].name),
                    "inner zone must not allow a higher speed than an outer zone",
                ));
            }
        }
        Ok(Self { zones })
    }

    /// 最近的包围区（障碍物距离仍 ≤ 的最小 `max_distance`）
    pub fn zone_for(&self, distance: f64) -> Option<&SafetyZone> {
        self.zones.iter().find(|z| distance <= z.max_distance)
    }

    /// 临界阈值（最内层安全区外沿）
    pub fn critical_threshold(&self) -> f64 {
        self.zones[0].max_distance
    }

    pub fn zones(&self) -> &[SafetyZone] {
        &self.zones
    }
}

impl Default for SafetyZoneTable {
    fn default() -> Self {
        Self {
            zones: vec![
                SafetyZone::new("critical", 1.0, 0.1),
                SafetyZone::new("warning", 3.0, 0.5),
                SafetyZone::new("caution", 5.0, 1.0),
            ],
        }
    }
}

impl TryFrom<Vec<SafetyZone>> for SafetyZoneTable {
    type Error = ConfigError;

    fn try_from(zones: Vec<SafetyZone>) -> Result<Self, Self::Error> {
        Self::new(zones)
    }
}

impl From<SafetyZoneTable> for Vec<SafetyZone> {
    fn from(table: SafetyZoneTable) -> Self {
        table.zones
    }
}
