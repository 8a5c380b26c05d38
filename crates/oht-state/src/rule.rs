//! 转换规则
//!
//! 规则在静态转换表之上附加前置条件、动作、超时与优先级。匹配 `(from, to)`
//! 的启用规则优先于静态表；同一对状态有多条规则时优先级高者生效，优先级相同
//! 时先注册者生效。

use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::state::SystemState;
use crate::subsystem::{SubsystemState, SubsystemStatus};

/// 前置条件（在状态机锁内针对当前子系统表求值）
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// 指定子系统必须 Online
    SubsystemOnline(String),
    /// 不允许任何子系统处于 Error
    NoSubsystemErrors,
    /// 子系统平均健康度下限（无子系统时视为满足）
    MinimumHealth(f64),
}

impl Precondition {
    pub(crate) fn check(&self, subsystems: &BTreeMap<String, SubsystemStatus>) -> Result<(), String> {
        match self {
            Self::SubsystemOnline(id) => match subsystems.get(id) {
                Some(s) if s.state == SubsystemState::Online => Ok(()),
                Some(s) => Err(format!("subsystem {id} is {}", s.state)),
                None => Err(format!("subsystem {id} is not registered")),
            },
            Self::NoSubsystemErrors => {
                match subsystems.values().find(|s| s.state == SubsystemState::Error) {
                    Some(s) => Err(format!("subsystem {} is in error", s.id)),
                    None => Ok(()),
                }
            },
            Self::MinimumHealth(min) => {
                if subsystems.is_empty() {
                    return Ok(());
                }
                let avg = subsystems.values().map(|s| s.health).sum::<f64>()
                    / subsystems.len() as f64;
                if avg >= *min {
                    Ok(())
                } else {
                    Err(format!("average subsystem health {avg:.2} below {min:.2}"))
                }
            },
        }
    }
}

/// 转换成功后在同一把锁内执行的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    /// 清零所有子系统的错误/告警计数
    ResetErrorCounters,
    /// 强制设置某个子系统状态
    SetSubsystem { id: String, state: SubsystemState },
    /// 追加一条自定义事件
    Record(String),
}

pub type Preconditions = SmallVec<[Precondition; 2]>;
pub type Actions = SmallVec<[RuleAction; 2]>;

/// 转换规则
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRule {
    pub from: SystemState,
    pub to: SystemState,
    /// 写入历史的触发名称
    pub trigger: String,
    pub preconditions: Preconditions,
    pub actions: Actions,
    /// 在 `from` 停留满该时长后由 `poll_timeouts` 自动触发
    pub timeout: Option<Duration>,
    /// 冲突时高者生效
    pub priority: i32,
    pub enabled: bool,
}

impl TransitionRule {
    pub fn new(from: SystemState, to: SystemState, trigger: impl Into<String>) -> Self {
        Self {
            from,
            to,
            trigger: trigger.into(),
            preconditions: SmallVec::new(),
            actions: SmallVec::new(),
            timeout: None,
            priority: 0,
            enabled: true,
        }
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn action(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub(crate) fn check_preconditions(
        &self,
        subsystems: &BTreeMap<String, SubsystemStatus>,
    ) -> Result<(), String> {
        self.preconditions
            .iter()
            .try_for_each(|p| p.check(subsystems))
    }
}

/// 默认规则集
///
/// - 关机只能从静止/故障类状态进入
/// - 维护模式只能从 Idle 进入
/// - 故障与急停恢复要求没有子系统处于 Error
/// - 初始化与对接有停留超时
pub fn default_rules() -> Vec<TransitionRule> {
    use SystemState::*;

    let mut rules: Vec<TransitionRule> = [Idle, Docked, Fault, EmergencyStop, Maintenance]
        .into_iter()
        .map(|from| TransitionRule::new(from, Shutdown, "shutdown"))
        .collect();

    rules.extend([
        TransitionRule::new(Idle, Maintenance, "enter_maintenance"),
        TransitionRule::new(Fault, Idle, "fault_cleared")
            .precondition(Precondition::NoSubsystemErrors)
            .action(RuleAction::ResetErrorCounters)
            .priority(10),
        TransitionRule::new(EmergencyStop, Idle, "safety_cleared")
            .precondition(Precondition::NoSubsystemErrors)
            .priority(10),
        TransitionRule::new(Initializing, Fault, "initialization_timeout")
            .timeout(Duration::from_secs(30)),
        TransitionRule::new(Docking, Fault, "docking_timeout")
            .timeout(Duration::from_secs(120))
            .action(RuleAction::Record("docking did not complete in time".into())),
    ]);
    rules
}
