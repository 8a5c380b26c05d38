//! 系统状态机
//!
//! 持有唯一的当前状态。所有转换、子系统更新、历史与事件追加都在同一把锁内
//! 同步完成：两个并发的转换请求只会有一个成功，另一个看到 `from` 已不匹配
//! 而被拒绝，不会出现丢失更新。

use oht_protocol::ControlTrigger;
use oht_tools::{Clock, ConfigError, RingBuffer};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::StateError;
use crate::rule::{RuleAction, TransitionRule, default_rules};
use crate::state::SystemState;
use crate::subsystem::{SubsystemState, SubsystemStatus};

/// 固件子系统的标识（由监督器根据网关状态维护）
pub const FIRMWARE_SUBSYSTEM: &str = "firmware";

/// 状态机配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateConfig {
    pub history_capacity: usize,
    pub event_capacity: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            event_capacity: 50,
        }
    }
}

impl StateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::invalid("state.history_capacity", "must be greater than 0"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid("state.event_capacity", "must be greater than 0"));
        }
        Ok(())
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// 状态历史条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateHistoryEntry {
    pub from: SystemState,
    pub to: SystemState,
    pub trigger: String,
    /// 在 `from` 中停留的时长
    #[serde(rename = "time_in_previous_ms", serialize_with = "serialize_millis")]
    pub time_in_previous: Duration,
    #[serde(skip)]
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateEventKind {
    Transition,
    SubsystemChanged,
    RuleAction,
}

/// 状态事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEvent {
    pub kind: StateEventKind,
    pub message: String,
    #[serde(skip)]
    pub at: Instant,
}

/// 系统整体状态（纯读取）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub state: SystemState,
    #[serde(rename = "time_in_state_ms", serialize_with = "serialize_millis")]
    pub time_in_state: Duration,
    pub total_transitions: u64,
    pub subsystem_count: usize,
    pub online_subsystems: usize,
    /// Online 子系统占比（无子系统时为 1.0）
    pub health_fraction: f64,
    pub average_health: f64,
    /// 处于 Warning 的子系统数
    pub alert_subsystems: usize,
    /// 处于 Error 的子系统数
    pub error_subsystems: usize,
    pub offline_subsystems: usize,
    pub subsystems: Vec<SubsystemStatus>,
}

#[derive(Debug)]
struct MachineInner {
    current: SystemState,
    entered_at: Instant,
    total_transitions: u64,
    rules: Vec<TransitionRule>,
    subsystems: BTreeMap<String, SubsystemStatus>,
    history: RingBuffer<StateHistoryEntry>,
    events: RingBuffer<StateEvent>,
}

impl MachineInner {
    fn push_event(&mut self, kind: StateEventKind, message: String, at: Instant) {
        self.events.push(StateEvent { kind, message, at });
    }

    /// 子系统状态变化时追加事件
    fn set_subsystem(&mut self, id: &str, state: SubsystemState, health: Option<f64>, now: Instant) {
        let entry = self
            .subsystems
            .entry(id.to_string())
            .or_insert_with(|| SubsystemStatus::new(id, id));
        if let Some(health) = health {
            entry.health = health;
        }
        entry.last_heartbeat = Some(now);

        let prior = entry.state;
        if prior == state {
            return;
        }
        entry.state = state;
        match state {
            SubsystemState::Error => entry.error_count += 1,
            SubsystemState::Warning => entry.warning_count += 1,
            _ => {},
        }
        let message = format!("subsystem {id}: {prior} -> {state}");
        match state {
            SubsystemState::Online => info!(subsystem = id, %prior, "Subsystem online"),
            _ => warn!(subsystem = id, %prior, %state, "Subsystem state changed"),
        }
        self.push_event(StateEventKind::SubsystemChanged, message, now);
    }
}

/// 系统状态机
#[derive(Debug)]
pub struct StateMachine {
    clock: Arc<dyn Clock>,
    inner: Mutex<MachineInner>,
}

impl StateMachine {
    /// 以 `Initializing` 为初始状态，装载 [`default_rules`]
    pub fn new(config: StateConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            clock,
            inner: Mutex::new(MachineInner {
                current: SystemState::Initializing,
                entered_at: now,
                total_transitions: 0,
                rules: default_rules(),
                subsystems: BTreeMap::new(),
                history: RingBuffer::new(config.history_capacity),
                events: RingBuffer::new(config.event_capacity),
            }),
        }
    }

    pub fn current_state(&self) -> SystemState {
        self.inner.lock().current
    }

    // ==================== 规则 ====================

    /// 注册规则（不允许从终止状态转出，也不允许自环）
    pub fn add_rule(&self, rule: TransitionRule) -> Result<(), StateError> {
        if rule.from.is_terminal() {
            return Err(StateError::InvalidRule(format!(
                "{} is terminal, rule {} can never apply",
                rule.from, rule.trigger
            )));
        }
        if rule.from == rule.to {
            return Err(StateError::InvalidRule(format!(
                "rule {} is a self-transition on {}",
                rule.trigger, rule.from
            )));
        }
        debug!(from = %rule.from, to = %rule.to, trigger = %rule.trigger, "Transition rule added");
        self.inner.lock().rules.push(rule);
        Ok(())
    }

    /// 按触发名称启用/停用规则，返回受影响的规则数
    pub fn set_rules_enabled(&self, trigger: &str, enabled: bool) -> usize {
        let mut inner = self.inner.lock();
        let mut count = 0;
        for rule in inner.rules.iter_mut().filter(|r| r.trigger == trigger) {
            rule.enabled = enabled;
            count += 1;
        }
        count
    }

    pub fn rules(&self) -> Vec<TransitionRule> {
        self.inner.lock().rules.clone()
    }

    // ==================== 转换 ====================

    /// 执行转换 `from → to`
    ///
    /// 当前状态不是 `from`、规则前置条件不满足、或 `(from, to)` 既无启用规则也不在
    /// 静态表中时返回错误，状态保持不变。
    pub fn transition(
        &self,
        from: SystemState,
        to: SystemState,
        trigger: &str,
    ) -> Result<StateHistoryEntry, StateError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.transition_locked(&mut inner, from, to, trigger, now)
            .inspect_err(|e| warn!(%from, %to, trigger, error = %e, "State transition rejected"))
    }

    /// 从当前状态转换到 `to`
    pub fn transition_to(&self, to: SystemState, trigger: &str) -> Result<StateHistoryEntry, StateError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let from = inner.current;
        self.transition_locked(&mut inner, from, to, trigger, now)
            .inspect_err(|e| warn!(%from, %to, trigger, error = %e, "State transition rejected"))
    }

    /// 处理网关/安全模块发来的触发
    ///
    /// 返回实际发生的转换；触发只影响子系统或已处于目标状态时返回 `Ok(None)`。
    pub fn apply_trigger(&self, trigger: &ControlTrigger) -> Result<Option<StateHistoryEntry>, StateError> {
        let now = self.clock.now();
        let name = trigger.name();
        let mut inner = self.inner.lock();
        let current = inner.current;

        let target = match trigger {
            ControlTrigger::EmergencyStop { reason } => {
                warn!(%reason, "Emergency stop trigger received");
                (current != SystemState::EmergencyStop).then_some(SystemState::EmergencyStop)
            },
            ControlTrigger::SafetyCleared => {
                (current == SystemState::EmergencyStop).then_some(SystemState::Idle)
            },
            ControlTrigger::FirmwareLost { reason } => {
                warn!(%reason, "Firmware link lost");
                inner.set_subsystem(FIRMWARE_SUBSYSTEM, SubsystemState::Offline, Some(0.0), now);
                None
            },
            ControlTrigger::FirmwareRestored => {
                inner.set_subsystem(FIRMWARE_SUBSYSTEM, SubsystemState::Online, Some(1.0), now);
                None
            },
            ControlTrigger::FirmwareUnrecoverable { reason } => {
                warn!(%reason, "Firmware unrecoverable");
                inner.set_subsystem(FIRMWARE_SUBSYSTEM, SubsystemState::Error, Some(0.0), now);
                (current != SystemState::Fault).then_some(SystemState::Fault)
            },
        };

        match target {
            Some(to) => self
                .transition_locked(&mut inner, current, to, name, now)
                .map(Some)
                .inspect_err(|e| warn!(%current, %to, trigger = name, error = %e, "Trigger could not be applied")),
            None => Ok(None),
        }
    }

    /// 触发停留超时规则
    ///
    /// 当前状态有启用的超时规则且停留时长已达到时执行转换（优先级最高者）。
    pub fn poll_timeouts(&self) -> Option<StateHistoryEntry> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let current = inner.current;
        let dwell = now.saturating_duration_since(inner.entered_at);

        let rule = inner
            .rules
            .iter()
            .filter(|r| r.enabled && r.from == current && r.timeout.is_some_and(|t| dwell >= t))
            .min_by_key(|r| Reverse(r.priority))
            .cloned()?;

        if let Err(reason) = rule.check_preconditions(&inner.subsystems) {
            debug!(trigger = %rule.trigger, %reason, "Timeout rule precondition not met");
            return None;
        }
        warn!(
            from = %current,
            to = %rule.to,
            dwell_ms = dwell.as_millis() as u64,
            trigger = %rule.trigger,
            "State timeout expired"
        );
        Some(self.commit_locked(&mut inner, rule.to, &rule.trigger, &rule.actions, now))
    }

    // ==================== 子系统 ====================

    /// 注册子系统（已存在时只更新名称）
    pub fn register_subsystem(&self, id: &str, name: &str) {
        let mut inner = self.inner.lock();
        inner
            .subsystems
            .entry(id.to_string())
            .and_modify(|s| s.name = name.to_string())
            .or_insert_with(|| SubsystemStatus::new(id, name));
    }

    /// 更新子系统状态与健康度（未注册的子系统自动注册）
    pub fn update_subsystem_status(
        &self,
        id: &str,
        state: SubsystemState,
        health: f64,
    ) -> Result<(), StateError> {
        if !(0.0..=1.0).contains(&health) {
            return Err(StateError::InvalidHealth {
                id: id.to_string(),
                health,
            });
        }
        let now = self.clock.now();
        self.inner.lock().set_subsystem(id, state, Some(health), now);
        Ok(())
    }

    pub fn subsystem(&self, id: &str) -> Option<SubsystemStatus> {
        self.inner.lock().subsystems.get(id).cloned()
    }

    // ==================== 查询 ====================

    pub fn system_status(&self) -> SystemStatus {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let subsystems: Vec<SubsystemStatus> = inner.subsystems.values().cloned().collect();
        let count_in = |state: SubsystemState| subsystems.iter().filter(|s| s.state == state).count();

        let total = subsystems.len();
        let online = count_in(SubsystemState::Online);
        let (health_fraction, average_health) = if total == 0 {
            (1.0, 1.0)
        } else {
            (
                online as f64 / total as f64,
                subsystems.iter().map(|s| s.health).sum::<f64>() / total as f64,
            )
        };

        SystemStatus {
            state: inner.current,
            time_in_state: now.saturating_duration_since(inner.entered_at),
            total_transitions: inner.total_transitions,
            subsystem_count: total,
            online_subsystems: online,
            health_fraction,
            average_health,
            alert_subsystems: count_in(SubsystemState::Warning),
            error_subsystems: count_in(SubsystemState::Error),
            offline_subsystems: count_in(SubsystemState::Offline),
            subsystems,
        }
    }

    /// 最近 `window` 条转换历史（旧 → 新）
    pub fn history(&self, window: usize) -> Vec<StateHistoryEntry> {
        let inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(window);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// 最近 `limit` 条事件（旧 → 新）
    pub fn events(&self, limit: usize) -> Vec<StateEvent> {
        let inner = self.inner.lock();
        let skip = inner.events.len().saturating_sub(limit);
        inner.events.iter().skip(skip).cloned().collect()
    }

    // ==================== 内部实现 ====================

    fn transition_locked(
        &self,
        inner: &mut MachineInner,
        from: SystemState,
        to: SystemState,
        trigger: &str,
        now: Instant,
    ) -> Result<StateHistoryEntry, StateError> {
        if inner.current != from {
            return Err(StateError::StateMismatch {
                expected: from,
                actual: inner.current,
            });
        }

        let rule = inner
            .rules
            .iter()
            .filter(|r| r.enabled && r.from == from && r.to == to)
            .min_by_key(|r| Reverse(r.priority))
            .cloned();

        match &rule {
            Some(rule) => rule
                .check_preconditions(&inner.subsystems)
                .map_err(|reason| StateError::PreconditionFailed { from, to, reason })?,
            None if from.can_transition_to(to) => {},
            None => return Err(StateError::IllegalTransition { from, to }),
        }

        let actions = rule.map(|r| r.actions).unwrap_or_default();
        Ok(self.commit_locked(inner, to, trigger, &actions, now))
    }

    /// 唯一的状态写入点
    fn commit_locked(
        &self,
        inner: &mut MachineInner,
        to: SystemState,
        trigger: &str,
        actions: &[RuleAction],
        now: Instant,
    ) -> StateHistoryEntry {
        let from = inner.current;
        let entry = StateHistoryEntry {
            from,
            to,
            trigger: trigger.to_string(),
            time_in_previous: now.saturating_duration_since(inner.entered_at),
            at: now,
        };

        inner.current = to;
        inner.entered_at = now;
        inner.total_transitions += 1;
        inner.history.push(entry.clone());
        inner.push_event(
            StateEventKind::Transition,
            format!("{from} -> {to} ({trigger})"),
            now,
        );
        info!(%from, %to, trigger, "State transition");

        for action in actions {
            match action {
                RuleAction::ResetErrorCounters => {
                    for s in inner.subsystems.values_mut() {
                        s.error_count = 0;
                        s.warning_count = 0;
                    }
                    inner.push_event(
                        StateEventKind::RuleAction,
                        "subsystem error counters reset".to_string(),
                        now,
                    );
                },
                RuleAction::SetSubsystem { id, state } => inner.set_subsystem(id, *state, None, now),
                RuleAction::Record(message) => {
                    inner.push_event(StateEventKind::RuleAction, message.clone(), now)
                },
            }
        }
        entry
    }
}
