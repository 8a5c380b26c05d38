//! 速度控制器
//!
//! [`SpeedGovernor`] 是 [`SpeedState`] 的唯一写入者：目标速度校验、限速计算、
//! 加速度计算和状态提交都在同一把锁内同步完成，不跨越任何挂起点。
//!
//! # 限速优先级
//!
//! 1. `safety_override` → `max_speed`
//! 2. `SpeedMode::Emergency` → `emergency_speed`
//! 3. `SpeedMode::Safety` 或 `safety_active` → `safety_speed`
//! 4. `obstacle_detected` → `safety_speed`
//! 5. 其他 → `max_speed`
//!
//! # 响应时间
//!
//! 每次指令从进入到提交的耗时写入有界性能窗口；超过预算（默认 5ms）只记录
//! 警告，不会使调用失败。

use oht_tools::{Clock, ConfigError, LatencyStatistics, RingBuffer, SpeedLimits};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::SpeedError;

/// 速度模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    #[default]
    Manual,
    Auto,
    Safety,
    Emergency,
}

impl fmt::Display for SpeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Safety => "safety",
            Self::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// 执行机构（电机控制接口）
///
/// 在控制器锁内同步调用，实现不得阻塞。返回错误时控制器状态保持不变。
pub trait SpeedSink: Send + Sync + fmt::Debug {
    fn apply(&self, speed: f64, acceleration: f64) -> Result<(), SpeedError>;
}

/// 空执行机构：只记录日志（速度指令由固件侧执行时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SpeedSink for NullSink {
    fn apply(&self, speed: f64, acceleration: f64) -> Result<(), SpeedError> {
        trace!(speed, acceleration, "speed applied");
        Ok(())
    }
}

/// 控制器配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorConfig {
    pub limits: SpeedLimits,
    /// 单次指令响应时间预算
    pub response_budget: Duration,
    /// 性能窗口容量（最近 N 次指令）
    pub performance_window: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            limits: SpeedLimits::default(),
            response_budget: Duration::from_millis(5),
            performance_window: 1000,
        }
    }
}

impl GovernorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        if self.response_budget.is_zero() {
            return Err(ConfigError::invalid(
                "speed.response_budget_ms",
                "must be greater than 0",
            ));
        }
        if self.performance_window == 0 {
            return Err(ConfigError::invalid(
                "speed.performance_window",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 速度状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedState {
    pub current_speed: f64,
    pub target_speed: f64,
    pub acceleration: f64,
    pub mode: SpeedMode,
    pub safety_active: bool,
    pub obstacle_detected: bool,
    pub command_count: u64,
    #[serde(skip)]
    pub last_update: Instant,
}

/// 单次指令结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedOutcome {
    /// 请求的目标速度
    pub requested: f64,
    /// 限速后实际执行的速度
    pub current_speed: f64,
    pub acceleration: f64,
    pub mode: SpeedMode,
    pub safety_active: bool,
    /// 请求是否被限速
    pub clamped: bool,
    #[serde(rename = "response_time_ms", serialize_with = "serialize_millis")]
    pub response_time: Duration,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_micros() as f64 / 1000.0)
}

/// 性能指标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_commands: u64,
    pub budget_violations: u64,
    pub response_time_target_ms: f64,
    /// 窗口内所有指令均在预算内
    pub target_met: bool,
    pub latency: LatencyStatistics,
}

#[derive(Debug)]
struct GovernorInner {
    state: SpeedState,
    response_times: RingBuffer<Duration>,
    budget_violations: u64,
}

/// 速度控制器
#[derive(Debug)]
pub struct SpeedGovernor {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn SpeedSink>,
    inner: Mutex<GovernorInner>,
}

impl SpeedGovernor {
    /// 构造控制器（配置需预先通过 [`GovernorConfig::validate`]）
    pub fn new(config: GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        info!(limits = ?config.limits, "SpeedGovernor initialized");
        Self {
            inner: Mutex::new(GovernorInner {
                state: SpeedState {
                    current_speed: 0.0,
                    target_speed: 0.0,
                    acceleration: 0.0,
                    mode: SpeedMode::Manual,
                    safety_active: false,
                    obstacle_detected: false,
                    command_count: 0,
                    last_update: now,
                },
                response_times: RingBuffer::new(config.performance_window),
                budget_violations: 0,
            }),
            config,
            clock,
            sink: Arc::new(NullSink),
        }
    }

    /// 替换执行机构
    pub fn with_sink(mut self, sink: Arc<dyn SpeedSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn limits(&self) -> SpeedLimits {
        self.config.limits
    }

    pub fn current_speed(&self) -> f64 {
        self.inner.lock().state.current_speed
    }

    pub fn status(&self) -> SpeedState {
        self.inner.lock().state.clone()
    }

    /// 设置目标速度
    ///
    /// 负数或非有限值被拒绝且不修改任何状态；否则按当前模式与安全标志限速后执行。
    pub fn set_speed(
        &self,
        target: f64,
        mode: SpeedMode,
        safety_override: bool,
    ) -> Result<SpeedOutcome, SpeedError> {
        let start = self.clock.now();
        if !target.is_finite() || target < 0.0 {
            warn!(target, %mode, "Rejected invalid target speed");
            return Err(SpeedError::InvalidSpeed(target));
        }

        let mut inner = self.inner.lock();
        let cap = self.effective_cap(&inner.state, mode, safety_override);
        let speed = target.min(cap);
        if speed < target {
            warn!(target, cap, %mode, safety_override, "Target speed clamped");
        }
        let outcome = self.commit(&mut inner, start, target, speed, mode)?;
        debug!(speed, %mode, "Speed command executed");
        Ok(outcome)
    }

    /// 紧急停止：强制进入 Emergency 模式，目标速度为 0
    pub fn emergency_stop(&self) -> Result<SpeedOutcome, SpeedError> {
        let start = self.clock.now();
        let mut inner = self.inner.lock();
        let mut outcome = self
            .commit(&mut inner, start, 0.0, 0.0, SpeedMode::Emergency)
            .inspect_err(|e| error!(error = %e, "Emergency stop could not be applied"))?;
        inner.state.safety_active = true;
        outcome.safety_active = true;
        error!("Speed governor emergency stop executed");
        Ok(outcome)
    }

    /// 退出紧急模式（速度保持 0，回到 Manual）
    ///
    /// 不在紧急模式时返回 `false`。
    pub fn clear_emergency(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.mode != SpeedMode::Emergency {
            return false;
        }
        inner.state.mode = SpeedMode::Manual;
        inner.state.safety_active = false;
        inner.state.last_update = self.clock.now();
        info!("Speed governor left emergency mode");
        true
    }

    /// 更新安全标志
    ///
    /// 激活安全状态且当前速度超过 `safety_speed` 时立即降速，不会继续以超限速度运行。
    pub fn set_safety_status(
        &self,
        safety_active: bool,
        obstacle_detected: bool,
    ) -> Result<Option<SpeedOutcome>, SpeedError> {
        let start = self.clock.now();
        let mut inner = self.inner.lock();
        inner.state.safety_active = safety_active;
        inner.state.obstacle_detected = obstacle_detected;

        let safety_speed = self.config.limits.safety_speed;
        let current = inner.state.current_speed;
        if (safety_active || obstacle_detected) && current > safety_speed {
            warn!(current, safety_speed, "Safety activated, reducing speed");
            let mode = match inner.state.mode {
                SpeedMode::Emergency => SpeedMode::Emergency,
                _ => SpeedMode::Safety,
            };
            let outcome = self.commit(&mut inner, start, safety_speed, safety_speed, mode)?;
            return Ok(Some(outcome));
        }
        Ok(None)
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let inner = self.inner.lock();
        let budget = self.config.response_budget;
        PerformanceMetrics {
            total_commands: inner.state.command_count,
            budget_violations: inner.budget_violations,
            response_time_target_ms: budget.as_micros() as f64 / 1000.0,
            target_met: inner.response_times.iter().all(|rt| *rt < budget),
            latency: LatencyStatistics::calculate(inner.response_times.iter()),
        }
    }

    fn effective_cap(&self, state: &SpeedState, mode: SpeedMode, safety_override: bool) -> f64 {
        let limits = &self.config.limits;
        if safety_override {
            limits.max_speed
        } else if mode == SpeedMode::Emergency {
            limits.emergency_speed
        } else if mode == SpeedMode::Safety || state.safety_active || state.obstacle_detected {
            limits.safety_speed
        } else {
            limits.max_speed
        }
    }

    fn acceleration_for(&self, current: f64, speed: f64) -> f64 {
        let diff = speed - current;
        let bound = if diff > 0.0 {
            self.config.limits.max_acceleration
        } else {
            self.config.limits.max_deceleration
        };
        diff.abs().min(bound)
    }

    /// 唯一的状态提交点：先驱动执行机构，成功后再写状态
    fn commit(
        &self,
        inner: &mut GovernorInner,
        start: Instant,
        requested: f64,
        speed: f64,
        mode: SpeedMode,
    ) -> Result<SpeedOutcome, SpeedError> {
        let acceleration = self.acceleration_for(inner.state.current_speed, speed);
        self.sink.apply(speed, acceleration)?;

        let now = self.clock.now();
        let state = &mut inner.state;
        state.current_speed = speed;
        state.target_speed = speed;
        state.acceleration = acceleration;
        state.mode = mode;
        state.last_update = now;
        state.command_count += 1;

        let response_time = now.saturating_duration_since(start);
        inner.response_times.push(response_time);
        if response_time > self.config.response_budget {
            inner.budget_violations += 1;
            warn!(
                response_time_us = response_time.as_micros() as u64,
                budget_us = self.config.response_budget.as_micros() as u64,
                "Speed control response time exceeded budget"
            );
        }

        Ok(SpeedOutcome {
            requested,
            current_speed: speed,
            acceleration,
            mode,
            safety_active: inner.state.safety_active,
            clamped: speed < requested,
            response_time,
        })
    }
}
