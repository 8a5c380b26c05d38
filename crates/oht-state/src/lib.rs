//! # OHT State
//!
//! 系统状态机：唯一的当前状态、静态转换表 + 可配置转换规则、子系统健康、
//! 有界历史与事件。
//!
//! 状态机只接收 [`oht_protocol::ControlTrigger`]，从不反向调用网关或安全模块。

pub mod machine;
pub mod rule;
pub mod state;
pub mod subsystem;

pub use machine::{
    FIRMWARE_SUBSYSTEM, StateConfig, StateEvent, StateEventKind, StateHistoryEntry, StateMachine,
    SystemStatus,
};
pub use rule::{Actions, Precondition, Preconditions, RuleAction, TransitionRule, default_rules};
pub use state::SystemState;
pub use subsystem::{SubsystemState, SubsystemStatus};

use thiserror::Error;

/// 状态机错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// `(from, to)` 既无启用规则也不在静态表中
    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition { from: SystemState, to: SystemState },

    /// 请求时的 `from` 已不是当前状态（并发转换的失败方）
    #[error("State mismatch: expected {expected}, current state is {actual}")]
    StateMismatch {
        expected: SystemState,
        actual: SystemState,
    },

    #[error("Transition {from} -> {to} precondition failed: {reason}")]
    PreconditionFailed {
        from: SystemState,
        to: SystemState,
        reason: String,
    },

    #[error("Invalid transition rule: {0}")]
    InvalidRule(String),

    #[error("Invalid health {health} for subsystem {id} (expected 0..=1)")]
    InvalidHealth { id: String, health: f64 },
}
