//! 系统状态与静态转换表

use serde::Serialize;
use std::fmt;

/// 系统运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    /// 上电初始化
    Initializing,
    Idle,
    Moving,
    Docking,
    Docked,
    /// 故障（固件不可恢复、超时等）
    Fault,
    EmergencyStop,
    Maintenance,
    /// 终止状态，不允许任何转出
    Shutdown,
}

impl SystemState {
    pub const ALL: [SystemState; 9] = [
        Self::Initializing,
        Self::Idle,
        Self::Moving,
        Self::Docking,
        Self::Docked,
        Self::Fault,
        Self::EmergencyStop,
        Self::Maintenance,
        Self::Shutdown,
    ];

    /// 静态转换表：本状态允许到达的目标状态
    pub fn legal_targets(self) -> &'static [SystemState] {
        use SystemState::*;
        match self {
            Initializing => &[Idle, Fault],
            Idle => &[Moving, Docking, Fault, EmergencyStop],
            Moving => &[Idle, Docking, Fault, EmergencyStop],
            Docking => &[Docked, Idle, Fault, EmergencyStop],
            Docked => &[Idle, Fault, EmergencyStop],
            Fault => &[Idle, EmergencyStop],
            EmergencyStop => &[Idle, Fault],
            Maintenance => &[Idle, Fault],
            Shutdown => &[],
        }
    }

    pub fn can_transition_to(self, to: SystemState) -> bool {
        self.legal_targets().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Shutdown
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Moving => "moving",
            Self::Docking => "docking",
            Self::Docked => "docked",
            Self::Fault => "fault",
            Self::EmergencyStop => "emergency_stop",
            Self::Maintenance => "maintenance",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_is_terminal() {
        assert!(SystemState::Shutdown.is_terminal());
        for to in SystemState::ALL {
            assert!(!SystemState::Shutdown.can_transition_to(to));
        }
    }

    #[test]
    fn test_emergency_stop_reachable_from_operating_states() {
        use SystemState::*;
        for from in [Idle, Moving, Docking, Docked, Fault] {
            assert!(from.can_transition_to(EmergencyStop), "{from}");
        }
        for from in [Initializing, EmergencyStop, Maintenance, Shutdown] {
            assert!(!from.can_transition_to(EmergencyStop), "{from}");
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in SystemState::ALL {
            assert!(!state.can_transition_to(state));
        }
    }
}
