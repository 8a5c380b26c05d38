//! 指数退避重试
//!
//! `delay(n) = min(max_delay, base_delay × backoff_factor^(n-1))`，可选 ±10% 均匀抖动。
//! 不可重试的错误立即返回，不消耗重试预算；重试之间的睡眠不持有任何锁。

use oht_tools::{Clock, ConfigError, RingBuffer};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 抖动幅度（±10%）
const JITTER_RATIO: f64 = 0.1;

/// 错误自我分类：是否值得重试
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// 重试配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_enabled: bool,
    /// 保留的历史结果条数
    pub history_capacity: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter_enabled: true,
            history_capacity: 1000,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_factor",
                format!("{} must be >= 1.0", self.backoff_factor),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                "must not exceed max_delay_ms",
            ));
        }
        Ok(())
    }

    /// 第 `attempt` 次失败后的退避时长（1 起计，未加抖动）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter_enabled || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
        delay.mul_f64(factor).min(self.max_delay)
    }
}

/// 单次 `execute` 的结果记录
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub operation: String,
    pub success: bool,
    /// 实际调用次数（含首次）
    pub attempts: u32,
    pub total_elapsed: Duration,
    pub last_error: Option<String>,
    /// 每次重试前实际睡眠的时长
    pub delays: Vec<Duration>,
}

/// 历史统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStatistics {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub success_rate: f64,
    pub avg_attempts: f64,
    pub avg_latency_ms: f64,
}

/// 重试执行器
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
    history: Mutex<RingBuffer<RetryOutcome>>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            history: Mutex::new(RingBuffer::new(config.history_capacity)),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 执行 `f`，失败时按退避策略重试，耗尽后返回最后一个错误
    pub async fn execute_with_retry<T, E, F, Fut>(&self, op_name: &str, f: F) -> Result<T, E>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_traced(op_name, f).await.0
    }

    /// 同 [`execute_with_retry`](Self::execute_with_retry)，额外返回本次的 [`RetryOutcome`]
    pub async fn execute_traced<T, E, F, Fut>(
        &self,
        op_name: &str,
        mut f: F,
    ) -> (Result<T, E>, RetryOutcome)
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = self.clock.now();
        let mut delays = Vec::new();
        let mut attempt: u32 = 0;

        let result = loop {
            attempt += 1;
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "Operation succeeded after retry");
                    }
                    break Ok(value);
                },
                Err(e) if !e.is_retryable() => {
                    debug!(op = op_name, attempt, error = %e, "Non-retryable error, giving up");
                    break Err(e);
                },
                Err(e) if attempt > self.config.max_retries => {
                    warn!(op = op_name, attempts = attempt, error = %e, "Retry budget exhausted");
                    break Err(e);
                },
                Err(e) => {
                    let delay = self.config.jittered(self.config.delay_for(attempt));
                    warn!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    delays.push(delay);
                    self.clock.sleep(delay).await;
                },
            }
        };

        let outcome = RetryOutcome {
            operation: op_name.to_string(),
            success: result.is_ok(),
            attempts: attempt,
            total_elapsed: self.clock.now().saturating_duration_since(start),
            last_error: result.as_ref().err().map(ToString::to_string),
            delays,
        };
        self.history.lock().push(outcome.clone());
        (result, outcome)
    }

    /// 历史结果（从旧到新）
    pub fn history(&self) -> Vec<RetryOutcome> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn statistics(&self) -> RetryStatistics {
        let history = self.history.lock();
        let total = history.len();
        if total == 0 {
            return RetryStatistics::default();
        }
        let successful = history.iter().filter(|o| o.success).count();
        let attempts: u64 = history.iter().map(|o| u64::from(o.attempts)).sum();
        let latency_ms: f64 = history
            .iter()
            .map(|o| o.total_elapsed.as_secs_f64() * 1000.0)
            .sum();
        RetryStatistics {
            total_operations: total,
            successful_operations: successful,
            failed_operations: total - successful,
            success_rate: successful as f64 / total as f64,
            avg_attempts: attempts as f64 / total as f64,
            avg_latency_ms: latency_ms / total as f64,
        }
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oht_tools::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Invalid,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Transient)
        }
    }

    fn executor(jitter: bool) -> (RetryExecutor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = RetryConfig {
            jitter_enabled: jitter,
            ..RetryConfig::default()
        };
        (RetryExecutor::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_delay_schedule_capped() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(5),
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.delay_for(4), Duration::from_secs(5));
        assert_eq!(config.delay_for(200), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_always_failing_attempted_four_times() {
        let (executor, clock) = executor(false);
        let calls = AtomicU32::new(0);

        let (result, outcome) = executor
            .execute_traced("get_telemetry", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Transient)
            })
            .await;

        assert_eq!(result, Err(TestError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(
            clock.recorded_sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(outcome.total_elapsed, Duration::from_secs(7));
        assert_eq!(outcome.last_error.as_deref(), Some("Transient"));
    }

    #[tokio::test]
    async fn test_jitter_within_ten_percent() {
        let (executor, clock) = executor(true);
        let _ = executor
            .execute_with_retry("op", || async { Err::<(), _>(TestError::Transient) })
            .await;

        let expected = [1.0, 2.0, 4.0];
        let sleeps = clock.recorded_sleeps();
        assert_eq!(sleeps.len(), 3);
        for (actual, nominal) in sleeps.iter().zip(expected) {
            let secs = actual.as_secs_f64();
            assert!(
                secs >= nominal * 0.9 - 1e-9 && secs <= nominal * 1.1 + 1e-9,
                "delay {secs} outside ±10% of {nominal}"
            );
        }
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let (executor, clock) = executor(false);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute_with_retry("send_command", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::Invalid)
            })
            .await;

        assert_eq!(result, Err(TestError::Invalid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(clock.recorded_sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let (executor, _clock) = executor(false);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute_with_retry("get_robot_status", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        let stats = executor.statistics();
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.avg_attempts, 3.0);
        assert!((stats.avg_latency_ms - 3000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let clock = Arc::new(ManualClock::new());
        let executor = RetryExecutor::new(
            RetryConfig {
                history_capacity: 2,
                ..RetryConfig::default()
            },
            clock,
        );
        for _ in 0..3 {
            let _ = executor
                .execute_with_retry("op", || async { Ok::<_, TestError>(()) })
                .await;
        }
        assert_eq!(executor.history().len(), 2);
        executor.clear_history();
        assert_eq!(executor.statistics(), RetryStatistics::default());
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        let bad = RetryConfig {
            backoff_factor: 0.5,
            ..RetryConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
