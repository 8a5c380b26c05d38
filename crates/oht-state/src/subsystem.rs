//! 子系统健康状态

use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// 子系统状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemState {
    Online,
    Warning,
    Error,
    Offline,
}

impl fmt::Display for SubsystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Online => "online",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// 单个子系统
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsystemStatus {
    pub id: String,
    pub name: String,
    pub state: SubsystemState,
    /// 健康度（0..=1）
    pub health: f64,
    #[serde(skip)]
    pub last_heartbeat: Option<Instant>,
    /// 进入 Error 的次数
    pub error_count: u32,
    /// 进入 Warning 的次数
    pub warning_count: u32,
}

impl SubsystemStatus {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: SubsystemState::Offline,
            health: 0.0,
            last_heartbeat: None,
            error_count: 0,
            warning_count: 0,
        }
    }
}
