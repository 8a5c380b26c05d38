//! 固件健康探测
//!
//! 每次探测带超时；超时、传输错误、非 200 状态码、响应慢于
//! `max_response_time` 都计为失败。连续失败达到 `max_consecutive_failures`
//! 后整体判定为不健康，直到下一次合格的成功探测。

use oht_tools::{Clock, LatencyStatistics, RingBuffer};
use oht_transport::FirmwareTransport;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// 健康探测配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthConfig {
    /// 单次探测超时
    pub timeout: Duration,
    /// 超过此时长的成功响应也计为失败
    pub max_response_time: Duration,
    pub max_consecutive_failures: u32,
    /// 滚动统计窗口（次数）
    pub window: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_response_time: Duration::from_secs(2),
            max_consecutive_failures: 3,
            window: 100,
        }
    }
}

/// 单次探测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: f64,
    pub error: Option<String>,
    #[serde(skip)]
    pub response_time: Duration,
    #[serde(skip)]
    pub checked_at: Instant,
}

/// 滚动窗口统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthWindow {
    pub sample_count: usize,
    pub error_rate: f64,
    pub latency: LatencyStatistics,
}

/// 健康诊断报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub max_consecutive_failures: u32,
    pub total_checks: u64,
    pub total_failures: u64,
    pub last_check: Option<HealthCheck>,
    pub window: HealthWindow,
}

#[derive(Debug)]
struct ProbeState {
    consecutive_failures: u32,
    total_checks: u64,
    total_failures: u64,
    window: RingBuffer<HealthCheck>,
}

/// 健康探测器
#[derive(Debug)]
pub struct HealthProbe {
    transport: Arc<dyn FirmwareTransport>,
    clock: Arc<dyn Clock>,
    config: HealthConfig,
    state: Mutex<ProbeState>,
}

impl HealthProbe {
    pub fn new(
        transport: Arc<dyn FirmwareTransport>,
        clock: Arc<dyn Clock>,
        config: HealthConfig,
    ) -> Self {
        Self {
            transport,
            clock,
            state: Mutex::new(ProbeState {
                consecutive_failures: 0,
                total_checks: 0,
                total_failures: 0,
                window: RingBuffer::new(config.window),
            }),
            config,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// 执行一次探测并更新统计
    pub async fn check_health(&self) -> HealthCheck {
        let start = self.clock.now();
        let result = tokio::time::timeout(self.config.timeout, self.transport.health()).await;
        let elapsed = self.clock.now().saturating_duration_since(start);

        let (status_code, error) = match result {
            Err(_) => (None, Some(format!("health check timed out after {:?}", self.config.timeout))),
            Ok(Err(e)) => (None, Some(e.to_string())),
            Ok(Ok(reply)) if !reply.is_ok() => (
                Some(reply.status_code),
                Some(format!("unexpected status code {}", reply.status_code)),
            ),
            Ok(Ok(reply)) if elapsed > self.config.max_response_time => (
                Some(reply.status_code),
                Some(format!(
                    "slow response: {}ms exceeds {}ms",
                    elapsed.as_millis(),
                    self.config.max_response_time.as_millis()
                )),
            ),
            Ok(Ok(reply)) => (Some(reply.status_code), None),
        };

        let check = HealthCheck {
            healthy: error.is_none(),
            status_code,
            response_time_ms: elapsed.as_micros() as f64 / 1000.0,
            error,
            response_time: elapsed,
            checked_at: self.clock.now(),
        };
        self.record(&check);
        check
    }

    fn record(&self, check: &HealthCheck) {
        let mut state = self.state.lock();
        state.total_checks += 1;
        state.window.push(check.clone());

        if check.healthy {
            if state.consecutive_failures > 0 {
                debug!(
                    previous_failures = state.consecutive_failures,
                    "Firmware health restored"
                );
            }
            state.consecutive_failures = 0;
            return;
        }

        state.total_failures += 1;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let reason = check.error.as_deref().unwrap_or("unknown");
        if state.consecutive_failures == self.config.max_consecutive_failures {
            error!(
                consecutive_failures = state.consecutive_failures,
                reason, "Firmware declared unhealthy"
            );
        } else {
            warn!(
                consecutive_failures = state.consecutive_failures,
                reason, "Firmware health check failed"
            );
        }
    }

    /// 连续失败未达阈值即视为健康
    pub fn is_healthy(&self) -> bool {
        self.state.lock().consecutive_failures < self.config.max_consecutive_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn last_check(&self) -> Option<HealthCheck> {
        self.state.lock().window.latest().cloned()
    }

    /// 详细诊断（窗口错误率与延迟分位数）
    pub fn report(&self) -> HealthReport {
        let state = self.state.lock();
        let sample_count = state.window.len();
        let failures = state.window.iter().filter(|c| !c.healthy).count();
        let error_rate = if sample_count == 0 {
            0.0
        } else {
            failures as f64 / sample_count as f64
        };
        let latency = LatencyStatistics::calculate(state.window.iter().map(|c| &c.response_time));

        HealthReport {
            healthy: state.consecutive_failures < self.config.max_consecutive_failures,
            consecutive_failures: state.consecutive_failures,
            max_consecutive_failures: self.config.max_consecutive_failures,
            total_checks: state.total_checks,
            total_failures: state.total_failures,
            last_check: state.window.latest().cloned(),
            window: HealthWindow {
                sample_count,
                error_rate,
                latency,
            },
        }
    }

    /// 清空统计窗口与失败计数
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.total_checks = 0;
        state.total_failures = 0;
        state.window.clear();
    }
}
