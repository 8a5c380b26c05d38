//! 障碍物记录
//!
//! 由感知管线（不在本仓库范围内）按周期整体替换提交，无增量语义。

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Validate, check_non_negative};

/// 障碍物类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    Static,
    Dynamic,
    Person,
    Vehicle,
    Unknown,
}

impl ObstacleKind {
    /// 人员与车辆进入临界区时必须急停
    pub fn requires_emergency_stop(self) -> bool {
        matches!(self, Self::Person | Self::Vehicle)
    }
}

/// 单个障碍物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    /// 距离（米，≥ 0）
    pub distance: f64,
    /// 方位角（度）
    pub angle: f64,
    pub kind: ObstacleKind,
    /// 置信度（0..=1）
    pub confidence: f64,
    /// 观测时间戳（感知管线时钟，微秒）
    pub timestamp_us: u64,
}

impl Obstacle {
    pub fn new(distance: f64, angle: f64, kind: ObstacleKind, confidence: f64) -> Self {
        Self {
            distance,
            angle,
            kind,
            confidence,
            timestamp_us: 0,
        }
    }
}

impl Validate for Obstacle {
    fn validate(&self) -> Result<(), ProtocolError> {
        check_non_negative("distance", self.distance)?;
        if !self.angle.is_finite() {
            return Err(ProtocolError::InvalidValue {
                field: "angle",
                reason: "not finite".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ProtocolError::InvalidValue {
                field: "confidence",
                reason: format!("{} out of range 0..=1", self.confidence),
            });
        }
        Ok(())
    }
}
