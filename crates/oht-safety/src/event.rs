//! 安全事件日志

use serde::Serialize;
use std::time::Instant;

/// 事件严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyEventKind {
    /// 障碍物进入安全区，速度被压到区域限速
    SpeedReduction,
    /// 人员/车辆进入临界区
    EmergencyStop,
    /// 急停被复位
    EmergencyReset,
    /// 安全区表被替换
    ZonesReconfigured,
}

/// 单条安全事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyEvent {
    pub kind: SafetyEventKind,
    pub severity: Severity,
    pub message: String,
    /// 触发事件的障碍物距离（米）
    pub distance: Option<f64>,
    #[serde(skip)]
    pub at: Instant,
}
