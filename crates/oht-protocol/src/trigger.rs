//! 控制面内部触发消息
//!
//! 所有权单向流动：`FirmwareGateway` / `SafetyZoneEnforcer` 只发送，
//! `StateMachine` 只接收，状态机从不反向调用它们。

/// 发送给状态机的触发事件
#[derive(Debug, Clone, PartialEq)]
pub enum ControlTrigger {
    /// 临界安全违规，要求进入 EmergencyStop
    EmergencyStop { reason: String },
    /// 急停已被安全复位
    SafetyCleared,
    /// 固件健康检查连续失败达到阈值，已进入降级模式
    FirmwareLost { reason: String },
    /// 降级窗口耗尽仍无法恢复，要求进入 Fault
    FirmwareUnrecoverable { reason: String },
    /// 固件重新可达
    FirmwareRestored,
}

impl ControlTrigger {
    /// 触发名称（写入状态历史的 trigger 字段）
    pub fn name(&self) -> &'static str {
        match self {
            Self::EmergencyStop { .. } => "safety_emergency_stop",
            Self::SafetyCleared => "safety_cleared",
            Self::FirmwareLost { .. } => "firmware_lost",
            Self::FirmwareUnrecoverable { .. } => "firmware_unrecoverable",
            Self::FirmwareRestored => "firmware_restored",
        }
    }
}
