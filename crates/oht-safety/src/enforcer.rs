//! 安全区执行器
//!
//! 消费感知管线提交的障碍物列表（整体替换，无增量语义），找出最近障碍物，
//! 按安全区表决定限速，必要时直接驱动 [`SpeedGovernor`] 急停并向状态机发送
//! [`ControlTrigger::EmergencyStop`]。
//!
//! 障碍物替换与评估在同一把锁内串行执行，评估永远看不到半替换的列表。
//! 锁顺序固定为 执行器 → 控制器，控制器从不回调执行器。

use arc_swap::ArcSwap;
use crossbeam_channel::Sender;
use oht_protocol::{ControlTrigger, Obstacle, Validate};
use oht_tools::{Clock, RingBuffer, SafetyZone, SafetyZoneTable};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::event::{SafetyEvent, SafetyEventKind, Severity};
use crate::governor::{SpeedGovernor, SpeedMode};
use crate::SafetyError;

/// 安全事件日志容量
pub const EVENT_LOG_CAPACITY: usize = 100;

/// 单次评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyAssessment {
    pub nearest: Option<Obstacle>,
    /// 最近障碍物所在的安全区
    pub zone: Option<SafetyZone>,
    /// 速度被压到的区域限速
    pub speed_reduced_to: Option<f64>,
    /// 本次评估是否触发（或维持）急停
    pub emergency_stop: bool,
}

/// 安全状态报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyReport {
    pub obstacle_count: usize,
    pub nearest: Option<Obstacle>,
    pub active_zone: Option<String>,
    pub critical_threshold: f64,
    pub emergency_stop_active: bool,
    /// 距上次障碍物更新的时间（从未更新为 None）
    pub last_update_age_ms: Option<u64>,
    pub current_speed: f64,
    pub safety_active: bool,
    pub zones: Vec<SafetyZone>,
}

#[derive(Debug)]
struct EnforcerInner {
    obstacles: Vec<Obstacle>,
    last_update: Option<Instant>,
    emergency_stop_active: bool,
    events: RingBuffer<SafetyEvent>,
}

/// 安全区执行器
#[derive(Debug)]
pub struct SafetyZoneEnforcer {
    governor: Arc<SpeedGovernor>,
    zones: ArcSwap<SafetyZoneTable>,
    clock: Arc<dyn Clock>,
    triggers: Option<Sender<ControlTrigger>>,
    inner: Mutex<EnforcerInner>,
}

impl SafetyZoneEnforcer {
    pub fn new(governor: Arc<SpeedGovernor>, zones: SafetyZoneTable, clock: Arc<dyn Clock>) -> Self {
        info!(critical_threshold = zones.critical_threshold(), "SafetyZoneEnforcer initialized");
        Self {
            governor,
            zones: ArcSwap::from_pointee(zones),
            clock,
            triggers: None,
            inner: Mutex::new(EnforcerInner {
                obstacles: Vec::new(),
                last_update: None,
                emergency_stop_active: false,
                events: RingBuffer::new(EVENT_LOG_CAPACITY),
            }),
        }
    }

    /// 急停/复位事件的接收方（通常是状态机的触发通道）
    pub fn with_trigger_sender(mut self, sender: Sender<ControlTrigger>) -> Self {
        self.triggers = Some(sender);
        self
    }

    pub fn governor(&self) -> &Arc<SpeedGovernor> {
        &self.governor
    }

    /// 整体替换障碍物列表并立即评估
    ///
    /// 任一记录非法时整批拒绝，原列表保持不变。
    pub fn update_obstacles(&self, obstacles: Vec<Obstacle>) -> Result<SafetyAssessment, SafetyError> {
        for (index, obstacle) in obstacles.iter().enumerate() {
            obstacle
                .validate()
                .map_err(|source| SafetyError::InvalidObstacle { index, source })?;
        }

        let mut inner = self.inner.lock();
        debug!(count = obstacles.len(), "Obstacle list replaced");
        inner.obstacles = obstacles;
        inner.last_update = Some(self.clock.now());
        self.evaluate_locked(&mut inner)
    }

    /// 按当前障碍物列表重新评估
    pub fn evaluate(&self) -> Result<SafetyAssessment, SafetyError> {
        let mut inner = self.inner.lock();
        self.evaluate_locked(&mut inner)
    }

    /// 复位急停
    ///
    /// 仍有障碍物处于临界阈值内时返回 [`SafetyError::UnsafeToReset`]；
    /// 急停未激活时返回 `Ok(false)`。
    pub fn reset_emergency_stop(&self) -> Result<bool, SafetyError> {
        let mut inner = self.inner.lock();
        let threshold = self.zones.load().critical_threshold();

        if let Some(obstacle) = nearest(&inner.obstacles).filter(|o| o.distance < threshold) {
            warn!(
                distance = obstacle.distance,
                threshold, "Emergency stop reset refused, obstacle inside critical zone"
            );
            return Err(SafetyError::UnsafeToReset {
                distance: obstacle.distance,
                threshold,
            });
        }
        if !inner.emergency_stop_active {
            warn!("Emergency stop reset requested but not active");
            return Ok(false);
        }

        inner.emergency_stop_active = false;
        self.governor.clear_emergency();
        info!("Emergency stop state reset");
        self.record(
            &mut inner,
            SafetyEventKind::EmergencyReset,
            Severity::Info,
            "Emergency stop state reset".to_string(),
            None,
        );
        self.send_trigger(ControlTrigger::SafetyCleared);
        Ok(true)
    }

    /// 运行时替换安全区表（校验后整体替换）
    pub fn configure_safety_zones(&self, zones: Vec<SafetyZone>) -> Result<(), SafetyError> {
        let table = SafetyZoneTable::new(zones)?;
        let mut inner = self.inner.lock();
        let message = format!(
            "Safety zones updated: {}",
            table
                .zones()
                .iter()
                .map(|z| format!("{}<={}m@{}m/s", z.name, z.max_distance, z.speed_cap))
                .collect::<Vec<_>>()
                .join(", ")
        );
        info!(critical_threshold = table.critical_threshold(), "{message}");
        self.zones.store(Arc::new(table));
        self.record(
            &mut inner,
            SafetyEventKind::ZonesReconfigured,
            Severity::Info,
            message,
            None,
        );
        Ok(())
    }

    pub fn safety_zones(&self) -> SafetyZoneTable {
        self.zones.load().as_ref().clone()
    }

    pub fn is_emergency_stop_active(&self) -> bool {
        self.inner.lock().emergency_stop_active
    }

    /// 当前安全状态（纯读取）
    pub fn get_safety_status(&self) -> SafetyReport {
        let now = self.clock.now();
        let zones = self.zones.load();
        let inner = self.inner.lock();
        let nearest = nearest(&inner.obstacles).cloned();
        let active_zone = nearest
            .as_ref()
            .and_then(|o| zones.zone_for(o.distance))
            .map(|z| z.name.clone());
        let speed = self.governor.status();

        SafetyReport {
            obstacle_count: inner.obstacles.len(),
            nearest,
            active_zone,
            critical_threshold: zones.critical_threshold(),
            emergency_stop_active: inner.emergency_stop_active,
            last_update_age_ms: inner
                .last_update
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            current_speed: speed.current_speed,
            safety_active: speed.safety_active,
            zones: zones.zones().to_vec(),
        }
    }

    /// 最近 `limit` 条安全事件（旧 → 新）
    pub fn events(&self, limit: usize) -> Vec<SafetyEvent> {
        let inner = self.inner.lock();
        let skip = inner.events.len().saturating_sub(limit);
        inner.events.iter().skip(skip).cloned().collect()
    }

    fn evaluate_locked(&self, inner: &mut EnforcerInner) -> Result<SafetyAssessment, SafetyError> {
        let zones = self.zones.load();
        let Some(obstacle) = nearest(&inner.obstacles).cloned() else {
            return Ok(SafetyAssessment {
                nearest: None,
                zone: None,
                speed_reduced_to: None,
                emergency_stop: false,
            });
        };
        let zone = zones.zone_for(obstacle.distance).cloned();

        let mut speed_reduced_to = None;
        if let Some(zone) = &zone {
            let current = self.governor.current_speed();
            if current > zone.speed_cap {
                warn!(
                    current,
                    limit = zone.speed_cap,
                    zone = %zone.name,
                    distance = obstacle.distance,
                    "Speed violation detected, enforcing zone limit"
                );
                self.governor
                    .set_speed(zone.speed_cap, SpeedMode::Safety, true)?;
                self.record(
                    inner,
                    SafetyEventKind::SpeedReduction,
                    Severity::Warning,
                    format!(
                        "Speed reduced to {} m/s due to obstacle at {:.2} m",
                        zone.speed_cap, obstacle.distance
                    ),
                    Some(obstacle.distance),
                );
                speed_reduced_to = Some(zone.speed_cap);
            }
        }

        let threshold = zones.critical_threshold();
        let emergency_stop = obstacle.distance < threshold && obstacle.kind.requires_emergency_stop();
        if emergency_stop {
            self.governor.emergency_stop()?;
            if !inner.emergency_stop_active {
                inner.emergency_stop_active = true;
                let reason = format!(
                    "{:?} detected at {:.2} m (critical threshold {:.2} m)",
                    obstacle.kind, obstacle.distance, threshold
                );
                error!(distance = obstacle.distance, kind = ?obstacle.kind, "Emergency stop triggered by safety violation");
                self.record(
                    inner,
                    SafetyEventKind::EmergencyStop,
                    Severity::Critical,
                    reason.clone(),
                    Some(obstacle.distance),
                );
                self.send_trigger(ControlTrigger::EmergencyStop { reason });
            }
        }

        Ok(SafetyAssessment {
            nearest: Some(obstacle),
            zone,
            speed_reduced_to,
            emergency_stop,
        })
    }

    fn record(
        &self,
        inner: &mut EnforcerInner,
        kind: SafetyEventKind,
        severity: Severity,
        message: String,
        distance: Option<f64>,
    ) {
        inner.events.push(SafetyEvent {
            kind,
            severity,
            message,
            distance,
            at: self.clock.now(),
        });
    }

    fn send_trigger(&self, trigger: ControlTrigger) {
        if let Some(tx) = &self.triggers {
            let name = trigger.name();
            if tx.send(trigger).is_err() {
                debug!(trigger = name, "Trigger receiver dropped");
            }
        }
    }
}

/// 距离最近的障碍物（距离相同时取列表中靠前者）
fn nearest(obstacles: &[Obstacle]) -> Option<&Obstacle> {
    obstacles.iter().fold(None, |best, o| match best {
        Some(b) if b.distance <= o.distance => Some(b),
        _ => Some(o),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::GovernorConfig;
    use crossbeam_channel::unbounded;
    use oht_protocol::ObstacleKind;
    use oht_tools::ManualClock;

    fn enforcer() -> SafetyZoneEnforcer {
        let clock = Arc::new(ManualClock::new());
        let governor = Arc::new(SpeedGovernor::new(GovernorConfig::default(), clock.clone()));
        SafetyZoneEnforcer::new(governor, SafetyZoneTable::default(), clock)
    }

    #[test]
    fn test_nearest_ties_keep_list_order() {
        let obstacles = vec![
            Obstacle::new(2.0, 10.0, ObstacleKind::Static, 0.9),
            Obstacle::new(1.5, 20.0, ObstacleKind::Dynamic, 0.9),
            Obstacle::new(1.5, 30.0, ObstacleKind::Person, 0.9),
        ];
        let n = nearest(&obstacles).unwrap();
        assert_eq!(n.angle, 20.0);
        assert!(nearest(&[]).is_none());
    }

    #[test]
    fn test_speed_reduced_to_zone_cap() {
        let enforcer = enforcer();
        enforcer
            .governor()
            .set_speed(1.8, SpeedMode::Auto, false)
            .unwrap();

        let assessment = enforcer
            .update_obstacles(vec![Obstacle::new(2.5, 0.0, ObstacleKind::Static, 0.8)])
            .unwrap();
        assert_eq!(assessment.zone.unwrap().name, "warning");
        assert_eq!(assessment.speed_reduced_to, Some(0.5));
        assert!(!assessment.emergency_stop);
        assert_eq!(enforcer.governor().current_speed(), 0.5);
        assert_eq!(enforcer.governor().status().mode, SpeedMode::Safety);

        let events = enforcer.events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SafetyEventKind::SpeedReduction);
    }

    #[test]
    fn test_under_cap_no_action() {
        let enforcer = enforcer();
        enforcer
            .governor()
            .set_speed(0.8, SpeedMode::Auto, false)
            .unwrap();
        let assessment = enforcer
            .update_obstacles(vec![Obstacle::new(4.0, 0.0, ObstacleKind::Dynamic, 0.8)])
            .unwrap();
        assert_eq!(assessment.zone.unwrap().name, "caution");
        assert_eq!(assessment.speed_reduced_to, None);
        assert_eq!(enforcer.governor().current_speed(), 0.8);
        assert!(enforcer.events(10).is_empty());
    }

    #[test]
    fn test_static_obstacle_in_critical_zone_only_slows() {
        let enforcer = enforcer();
        enforcer
            .governor()
            .set_speed(1.0, SpeedMode::Auto, false)
            .unwrap();
        let assessment = enforcer
            .update_obstacles(vec![Obstacle::new(0.5, 0.0, ObstacleKind::Static, 0.9)])
            .unwrap();
        assert!(!assessment.emergency_stop);
        assert_eq!(enforcer.governor().current_speed(), 0.1);
        assert!(!enforcer.is_emergency_stop_active());
    }

    #[test]
    fn test_person_in_critical_zone_triggers_emergency_stop() {
        let (tx, rx) = unbounded();
        let enforcer = enforcer().with_trigger_sender(tx);
        enforcer
            .governor()
            .set_speed(0.05, SpeedMode::Auto, false)
            .unwrap();

        let assessment = enforcer
            .update_obstacles(vec![
                Obstacle::new(4.0, 0.0, ObstacleKind::Static, 0.9),
                Obstacle::new(0.3, 5.0, ObstacleKind::Person, 0.95),
            ])
            .unwrap();
        assert!(assessment.emergency_stop);
        assert_eq!(enforcer.governor().current_speed(), 0.0);
        assert_eq!(enforcer.governor().status().mode, SpeedMode::Emergency);
        assert!(enforcer.is_emergency_stop_active());
        assert!(matches!(rx.try_recv(), Ok(ControlTrigger::EmergencyStop { .. })));

        // 重复评估维持急停，但不重复上报
        assert!(enforcer.evaluate().unwrap().emergency_stop);
        assert!(rx.try_recv().is_err());
        let critical = enforcer
            .events(10)
            .into_iter()
            .filter(|e| e.severity == Severity::Critical)
            .count();
        assert_eq!(critical, 1);
    }

    #[test]
    fn test_reset_refused_while_obstacle_critical() {
        let (tx, rx) = unbounded();
        let enforcer = enforcer().with_trigger_sender(tx);
        enforcer
            .update_obstacles(vec![Obstacle::new(0.4, 0.0, ObstacleKind::Vehicle, 0.9)])
            .unwrap();
        let _ = rx.try_recv();

        let err = enforcer.reset_emergency_stop().unwrap_err();
        assert!(matches!(err, SafetyError::UnsafeToReset { distance, .. } if distance == 0.4));
        assert!(enforcer.is_emergency_stop_active());

        enforcer
            .update_obstacles(vec![Obstacle::new(3.5, 0.0, ObstacleKind::Vehicle, 0.9)])
            .unwrap();
        assert_eq!(enforcer.reset_emergency_stop(), Ok(true));
        assert_eq!(rx.try_recv(), Ok(ControlTrigger::SafetyCleared));
        assert!(!enforcer.is_emergency_stop_active());
        assert_eq!(enforcer.governor().status().mode, SpeedMode::Manual);

        // 未激活时复位返回 false
        assert_eq!(enforcer.reset_emergency_stop(), Ok(false));
    }

    #[test]
    fn test_invalid_obstacle_rejects_whole_update() {
        let enforcer = enforcer();
        enforcer
            .update_obstacles(vec![Obstacle::new(3.0, 0.0, ObstacleKind::Static, 0.9)])
            .unwrap();

        let err = enforcer
            .update_obstacles(vec![
                Obstacle::new(0.2, 0.0, ObstacleKind::Person, 0.9),
                Obstacle::new(-1.0, 0.0, ObstacleKind::Static, 0.9),
            ])
            .unwrap_err();
        assert!(matches!(err, SafetyError::InvalidObstacle { index: 1, .. }));

        let report = enforcer.get_safety_status();
        assert_eq!(report.obstacle_count, 1);
        assert_eq!(report.nearest.unwrap().distance, 3.0);
        assert!(!report.emergency_stop_active);
    }

    #[test]
    fn test_empty_list_clears_nearest() {
        let enforcer = enforcer();
        enforcer
            .update_obstacles(vec![Obstacle::new(2.0, 0.0, ObstacleKind::Static, 0.9)])
            .unwrap();
        let assessment = enforcer.update_obstacles(Vec::new()).unwrap();
        assert!(assessment.nearest.is_none());

        let report = enforcer.get_safety_status();
        assert_eq!(report.obstacle_count, 0);
        assert!(report.active_zone.is_none());
        assert_eq!(report.last_update_age_ms, Some(0));
    }

    #[test]
    fn test_configure_safety_zones() {
        let enforcer = enforcer();
        enforcer
            .configure_safety_zones(vec![
                SafetyZone::new("near", 2.0, 0.2),
                SafetyZone::new("far", 6.0, 0.8),
            ])
            .unwrap();
        assert_eq!(enforcer.safety_zones().critical_threshold(), 2.0);

        // 新阈值下 1.5 m 的人员触发急停
        let assessment = enforcer
            .update_obstacles(vec![Obstacle::new(1.5, 0.0, ObstacleKind::Person, 0.9)])
            .unwrap();
        assert!(assessment.emergency_stop);

        // 非法配置被拒绝，原表保持不变
        let err = enforcer
            .configure_safety_zones(vec![SafetyZone::new("bad", 0.0, 0.1)])
            .unwrap_err();
        assert!(matches!(err, SafetyError::Config(_)));
        assert_eq!(enforcer.safety_zones().zones().len(), 2);
        assert_eq!(enforcer.get_safety_status().active_zone.as_deref(), Some("near"));
    }

    #[test]
    fn test_event_log_bounded() {
        let enforcer = enforcer();
        for _ in 0..(EVENT_LOG_CAPACITY + 20) {
            enforcer
                .configure_safety_zones(SafetyZoneTable::default().zones().to_vec())
                .unwrap();
        }
        assert_eq!(enforcer.events(usize::MAX).len(), EVENT_LOG_CAPACITY);
        assert_eq!(enforcer.events(5).len(), 5);
    }
}
