//! 降级数据提供者
//!
//! 固件不可达时提供有时限的合成状态/遥测。所有合成载荷都带
//! `fallback_mode = true` 标记，调用方可区分真实数据与合成数据。
//!
//! 降级窗口超过 `max_duration` 后自动关闭并进入耗尽状态：在真实请求
//! 再次成功（[`FallbackProvider::mark_recovered`]）之前不会重新开启，
//! 网关据此向状态机上报不可恢复故障。

use oht_protocol::{Position, RobotStatus, SafetyStatus, Telemetry};
use oht_tools::Clock;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 降级配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub max_duration: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_duration: Duration::from_secs(30 * 60),
        }
    }
}

/// 降级窗口状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Inactive,
    Active { remaining: Duration },
    /// 窗口刚刚耗尽（本次检查触发了自动关闭）
    Expired,
}

/// 降级使用统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackStatistics {
    pub fallback_enabled: bool,
    pub fallback_active: bool,
    pub exhausted: bool,
    pub fallback_count: u64,
    pub total_fallback_time_ms: u64,
    pub avg_fallback_duration_ms: u64,
    pub current_duration_ms: Option<u64>,
    pub remaining_ms: Option<u64>,
    pub max_fallback_duration_ms: u64,
}

#[derive(Debug)]
struct FallbackInner {
    enabled: bool,
    max_duration: Duration,
    started_at: Option<Instant>,
    exhausted: bool,
    exhaustion_reported: bool,
    fallback_count: u64,
    total_time: Duration,
    last_status: Option<RobotStatus>,
    last_telemetry: Option<Telemetry>,
}

impl FallbackInner {
    fn close_window(&mut self, now: Instant) {
        if let Some(start) = self.started_at.take() {
            let elapsed = now.saturating_duration_since(start).min(self.max_duration);
            self.total_time += elapsed;
        }
    }
}

/// 降级数据提供者
#[derive(Debug)]
pub struct FallbackProvider {
    clock: Arc<dyn Clock>,
    robot_id: String,
    inner: Mutex<FallbackInner>,
}

impl FallbackProvider {
    pub fn new(config: FallbackConfig, robot_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            robot_id: robot_id.into(),
            inner: Mutex::new(FallbackInner {
                enabled: config.enabled,
                max_duration: config.max_duration,
                started_at: None,
                exhausted: false,
                exhaustion_reported: false,
                fallback_count: 0,
                total_time: Duration::ZERO,
                last_status: None,
                last_telemetry: None,
            }),
        }
    }

    /// 进入降级，返回降级是否可用
    ///
    /// 已处于降级时不重复计数；功能被禁用或窗口已耗尽时返回 `false`。
    pub fn enable(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if !inner.enabled {
            warn!("Cannot enter fallback mode: fallback is disabled");
            return false;
        }
        if inner.exhausted {
            return false;
        }
        if inner.started_at.is_none() {
            inner.started_at = Some(now);
            inner.fallback_count += 1;
            warn!(
                fallback_count = inner.fallback_count,
                max_duration_s = inner.max_duration.as_secs(),
                "Fallback mode enabled, serving synthetic firmware data"
            );
        }
        true
    }

    /// 退出降级并累计降级时长
    pub fn disable(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.started_at.is_some() {
            inner.close_window(now);
            info!("Fallback mode disabled, returning to normal operation");
        }
    }

    /// 检查窗口；超时则自动关闭并标记耗尽
    pub fn check(&self) -> FallbackState {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(start) = inner.started_at else {
            return FallbackState::Inactive;
        };
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= inner.max_duration {
            inner.close_window(now);
            inner.exhausted = true;
            warn!(
                elapsed_s = elapsed.as_secs(),
                "Fallback window expired, firmware connection must be re-established"
            );
            return FallbackState::Expired;
        }
        FallbackState::Active {
            remaining: inner.max_duration - elapsed,
        }
    }

    /// 仅在已开启且窗口未超时时为真，不改变窗口状态
    pub fn is_active(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner
            .started_at
            .is_some_and(|s| now.saturating_duration_since(s) < inner.max_duration)
    }

    /// 窗口已耗尽（含已超时但尚未被 [`check`](Self::check) 关闭的窗口）
    pub fn is_exhausted(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner.exhausted
            || inner
                .started_at
                .is_some_and(|s| now.saturating_duration_since(s) >= inner.max_duration)
    }

    /// 检查窗口并领取尚未上报的耗尽事件
    ///
    /// 每次耗尽只返回一次 `true`，直到 [`mark_recovered`](Self::mark_recovered)
    /// 重新开启窗口。
    pub fn take_exhaustion(&self) -> bool {
        self.check();
        let mut inner = self.inner.lock();
        if inner.exhausted && !inner.exhaustion_reported {
            inner.exhaustion_reported = true;
            true
        } else {
            false
        }
    }

    /// 真实请求成功：关闭降级并清除耗尽标记
    pub fn mark_recovered(&self) {
        self.disable();
        let mut inner = self.inner.lock();
        inner.exhaustion_reported = false;
        if inner.exhausted {
            inner.exhausted = false;
            info!("Firmware recovered, fallback window re-armed");
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        if !enabled {
            self.disable();
        }
        self.inner.lock().enabled = enabled;
        info!(enabled, "Fallback functionality toggled");
    }

    pub fn set_max_duration(&self, duration: Duration) {
        self.inner.lock().max_duration = duration;
        info!(max_duration_s = duration.as_secs(), "Fallback duration updated");
    }

    pub fn statistics(&self) -> FallbackStatistics {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let current = inner.started_at.map(|s| now.saturating_duration_since(s));
        let avg = inner.total_time / u32::try_from(inner.fallback_count.max(1)).unwrap_or(u32::MAX);
        FallbackStatistics {
            fallback_enabled: inner.enabled,
            fallback_active: current.is_some_and(|c| c < inner.max_duration),
            exhausted: inner.exhausted,
            fallback_count: inner.fallback_count,
            total_fallback_time_ms: inner.total_time.as_millis() as u64,
            avg_fallback_duration_ms: avg.as_millis() as u64,
            current_duration_ms: current.map(|c| c.as_millis() as u64),
            remaining_ms: current.map(|c| inner.max_duration.saturating_sub(c).as_millis() as u64),
            max_fallback_duration_ms: inner.max_duration.as_millis() as u64,
        }
    }

    /// 清零统计并退出降级
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.started_at = None;
        inner.exhausted = false;
        inner.exhaustion_reported = false;
        inner.fallback_count = 0;
        inner.total_time = Duration::ZERO;
        info!("Fallback statistics reset");
    }

    /// 记住最近一次真实状态，降级时以其为基础
    pub fn remember_status(&self, status: &RobotStatus) {
        self.inner.lock().last_status = Some(status.clone());
    }

    pub fn remember_telemetry(&self, telemetry: &Telemetry) {
        self.inner.lock().last_telemetry = Some(telemetry.clone());
    }

    /// 合成机器人状态（基于最后已知状态，否则为默认值）
    pub fn robot_status(&self) -> RobotStatus {
        let last = self.inner.lock().last_status.clone();
        match last {
            Some(status) => RobotStatus {
                fallback_mode: true,
                ..status
            },
            None => RobotStatus {
                robot_id: self.robot_id.clone(),
                status: "idle".to_string(),
                position: Some(Position { x: 0.0, y: 0.0 }),
                battery_level: None,
                temperature: None,
                fallback_mode: true,
            },
        }
    }

    /// 合成遥测
    ///
    /// 电机转速报告为 0：降级期间不能假定机器人在运动。
    pub fn telemetry(&self) -> Telemetry {
        let last = self.inner.lock().last_telemetry.clone();
        match last {
            Some(t) => Telemetry {
                motor_speed: 0.0,
                fallback_mode: true,
                ..t
            },
            None => Telemetry {
                motor_speed: 0.0,
                motor_temperature: 0.0,
                dock_status: "unknown".to_string(),
                safety_status: "warning".to_string(),
                fallback_mode: true,
            },
        }
    }

    /// 合成安全状态（保守地报告 warning）
    pub fn safety_status(&self) -> SafetyStatus {
        SafetyStatus {
            estop_active: false,
            safety_status: "warning".to_string(),
            fallback_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oht_tools::ManualClock;

    fn provider(clock: Arc<ManualClock>) -> FallbackProvider {
        FallbackProvider::new(FallbackConfig::default(), "OHT-50-001", clock)
    }

    #[test]
    fn test_enable_disable_accumulates_time() {
        let clock = Arc::new(ManualClock::new());
        let fb = provider(clock.clone());

        assert!(fb.enable());
        assert!(fb.is_active());
        clock.advance(Duration::from_secs(90));
        // 重复开启不重复计数
        assert!(fb.enable());
        fb.disable();
        assert!(!fb.is_active());

        let stats = fb.statistics();
        assert_eq!(stats.fallback_count, 1);
        assert_eq!(stats.total_fallback_time_ms, 90_000);
        assert_eq!(stats.current_duration_ms, None);
    }

    #[test]
    fn test_window_expires_and_exhausts() {
        let clock = Arc::new(ManualClock::new());
        let fb = provider(clock.clone());
        fb.enable();

        clock.advance(Duration::from_secs(29 * 60));
        assert_eq!(
            fb.check(),
            FallbackState::Active {
                remaining: Duration::from_secs(60)
            }
        );

        clock.advance(Duration::from_secs(60));
        assert_eq!(fb.check(), FallbackState::Expired);
        assert!(!fb.is_active());
        assert!(fb.is_exhausted());
        assert!(!fb.enable(), "exhausted window must not reopen");
        assert_eq!(fb.statistics().total_fallback_time_ms, 30 * 60 * 1000);

        fb.mark_recovered();
        assert!(!fb.is_exhausted());
        assert!(fb.enable());
        assert_eq!(fb.statistics().fallback_count, 2);
    }

    #[test]
    fn test_exhaustion_taken_once_regardless_of_observers() {
        let clock = Arc::new(ManualClock::new());
        let fb = provider(clock.clone());
        fb.set_max_duration(Duration::from_secs(10));
        fb.enable();
        clock.advance(Duration::from_secs(11));

        // 只读查询不关闭窗口，也不领取耗尽事件
        assert!(!fb.is_active());
        assert!(fb.is_exhausted());
        assert!(fb.statistics().current_duration_ms.is_some());

        assert!(fb.take_exhaustion());
        assert!(!fb.take_exhaustion());
        assert_eq!(fb.check(), FallbackState::Inactive);

        fb.mark_recovered();
        assert!(!fb.take_exhaustion());
        fb.enable();
        clock.advance(Duration::from_secs(10));
        assert!(fb.take_exhaustion());
    }

    #[test]
    fn test_disabled_functionality() {
        let clock = Arc::new(ManualClock::new());
        let fb = provider(clock);
        fb.enable();
        fb.set_enabled(false);
        assert!(!fb.is_active());
        assert!(!fb.enable());
        assert!(!fb.statistics().fallback_enabled);
    }

    #[test]
    fn test_set_max_duration_and_reset() {
        let clock = Arc::new(ManualClock::new());
        let fb = provider(clock.clone());
        fb.set_max_duration(Duration::from_secs(10));
        fb.enable();
        clock.advance(Duration::from_secs(4));
        assert_eq!(fb.statistics().remaining_ms, Some(6_000));

        fb.reset();
        let stats = fb.statistics();
        assert_eq!(stats.fallback_count, 0);
        assert!(!stats.fallback_active);
        assert_eq!(stats.max_fallback_duration_ms, 10_000);
    }

    #[test]
    fn test_synthetic_payloads_tagged() {
        let clock = Arc::new(ManualClock::new());
        let fb = provider(clock);
        let status = fb.robot_status();
        assert!(status.fallback_mode);
        assert_eq!(status.robot_id, "OHT-50-001");
        assert!(fb.telemetry().fallback_mode);
        assert!(fb.safety_status().fallback_mode);
    }

    #[test]
    fn test_synthetic_status_uses_last_known() {
        let clock = Arc::new(ManualClock::new());
        let fb = provider(clock);
        fb.remember_status(&RobotStatus {
            robot_id: "OHT-50-007".into(),
            status: "docked".into(),
            position: Some(Position { x: 1.0, y: 2.0 }),
            battery_level: Some(55.0),
            temperature: None,
            fallback_mode: false,
        });
        let status = fb.robot_status();
        assert_eq!(status.robot_id, "OHT-50-007");
        assert_eq!(status.status, "docked");
        assert!(status.fallback_mode);
    }
}
