//! 熔断器
//!
//! # 状态
//! - Closed: 正常放行
//! - Open: 固件视为不可用，请求立即失败，不发起 I/O
//! - HalfOpen: 恢复超时已过，放行恰好一次试探调用
//!
//! # 状态转换
//! ```text
//! Closed   → Open:     failure_count >= failure_threshold
//! Open     → HalfOpen: 距 last_failure 超过 recovery_timeout
//! HalfOpen → Closed:   试探调用成功
//! HalfOpen → Open:     试探调用失败
//! ```
//!
//! 熔断器内部不做重试；重试由 [`RetryExecutor`](crate::RetryExecutor) 在外层组合。
//! 所有熔断器按操作名保存在 [`CircuitBreakerRegistry`] 的一把锁内，锁从不跨越
//! `await`。

use oht_tools::Clock;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::GatewayError;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// 熔断器配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后打开
    pub failure_threshold: u32,
    /// 打开后多久允许试探
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// 单个熔断器的可观测状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    /// Open 状态下距离允许试探的剩余时间
    pub retry_in_ms: Option<u64>,
    /// 累计打开次数
    pub open_count: u64,
}

/// 单操作熔断器
///
/// 不变量：`state == Open` ⇒ `last_failure.is_some()`；任何成功都会立即把
/// `failure_count` 清零。
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: bool,
    open_count: u64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_in_flight: false,
            open_count: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// 是否允许发起调用
    ///
    /// Open 且恢复超时已过时转入 HalfOpen 并占用唯一的试探名额；
    /// HalfOpen 下试探尚未返回时拒绝其他调用。
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = self
                    .last_failure
                    .is_none_or(|t| now.saturating_duration_since(t) >= self.config.recovery_timeout);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_in_flight = true;
                }
                recovered
            },
            CircuitState::HalfOpen => {
                if self.half_open_in_flight {
                    false
                } else {
                    self.half_open_in_flight = true;
                    true
                }
            },
        }
    }

    /// 是否处于拒绝窗口（只读，不占用试探名额）
    pub fn is_blocking(&self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => self.half_open_in_flight,
            CircuitState::Open => self
                .last_failure
                .is_some_and(|t| now.saturating_duration_since(t) < self.config.recovery_timeout),
        }
    }

    /// 记录成功，返回发生的状态转换
    pub fn on_success(&mut self) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        self.failure_count = 0;
        self.half_open_in_flight = false;
        if from == CircuitState::Closed {
            return None;
        }
        self.state = CircuitState::Closed;
        Some((from, CircuitState::Closed))
    }

    /// 记录失败，返回发生的状态转换
    pub fn on_failure(&mut self, now: Instant) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);
        self.half_open_in_flight = false;

        if self.failure_count >= self.config.failure_threshold || from == CircuitState::HalfOpen {
            self.state = CircuitState::Open;
            if from != CircuitState::Open {
                self.open_count += 1;
                return Some((from, CircuitState::Open));
            }
        }
        None
    }

    /// 试探调用未产生结果就被取消：按失败处理，重新打开并释放名额
    pub fn on_abandon(&mut self, now: Instant) -> Option<(CircuitState, CircuitState)> {
        if self.state == CircuitState::HalfOpen && self.half_open_in_flight {
            self.on_failure(now)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure = None;
        self.half_open_in_flight = false;
    }

    pub fn status(&self, name: &str, now: Instant) -> CircuitStatus {
        let retry_in_ms = match (self.state, self.last_failure) {
            (CircuitState::Open, Some(t)) => {
                let elapsed = now.saturating_duration_since(t);
                Some(self.config.recovery_timeout.saturating_sub(elapsed).as_millis() as u64)
            },
            _ => None,
        };
        CircuitStatus {
            name: name.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout_ms: self.config.recovery_timeout.as_millis() as u64,
            retry_in_ms,
            open_count: self.open_count,
        }
    }
}

/// 按操作名索引的熔断器表
///
/// 首次使用时插入；插入与判定都在同一把锁内完成。
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// 申请调用许可，Open 时返回 [`GatewayError::CircuitOpen`]
    ///
    /// 许可在调用结束时通过 [`CircuitPermit::success`] /
    /// [`CircuitPermit::failure`] 结算；未结算就被丢弃的试探许可会重新打开
    /// 熔断器，保证下一个恢复窗口仍有试探名额。
    pub fn acquire<'a>(&'a self, op: &'a str) -> Result<CircuitPermit<'a>, GatewayError> {
        let now = self.clock.now();
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(op.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config));
        let before = breaker.state();
        if !breaker.try_acquire(now) {
            return Err(GatewayError::CircuitOpen { op: op.to_string() });
        }
        let trial = breaker.state() == CircuitState::HalfOpen;
        if before == CircuitState::Open && trial {
            info!(op, "Circuit breaker half-open, allowing trial call");
        }
        Ok(CircuitPermit {
            registry: self,
            op,
            trial,
            settled: false,
        })
    }

    /// 不经门控的许可（急停），仍然记录结果
    pub fn bypass<'a>(&'a self, op: &'a str) -> CircuitPermit<'a> {
        CircuitPermit {
            registry: self,
            op,
            trial: false,
            settled: false,
        }
    }

    fn abandon_trial(&self, op: &str) {
        let now = self.clock.now();
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(op) else {
            return;
        };
        if breaker.on_abandon(now).is_some() {
            warn!(op, "Trial call cancelled before completion, circuit re-opened");
        }
    }

    pub fn record_success(&self, op: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(op.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config));
        if let Some((from, to)) = breaker.on_success() {
            info!(op, %from, %to, "Circuit breaker closed");
        }
    }

    pub fn record_failure(&self, op: &str) {
        let now = self.clock.now();
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(op.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config));
        if let Some((from, to)) = breaker.on_failure(now) {
            warn!(
                op,
                %from,
                %to,
                failures = breaker.failure_count(),
                "Circuit breaker opened"
            );
        }
    }

    /// 在熔断保护下执行 `f`
    ///
    /// 拒绝时不调用 `f`。锁只在判定与记录时短暂持有。
    pub async fn call<T, F, Fut>(&self, op: &str, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let permit = self.acquire(op)?;
        let result = f().await;
        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        result
    }

    /// 只读判定：当前是否会拒绝 `op`
    pub fn is_blocking(&self, op: &str) -> bool {
        let now = self.clock.now();
        self.breakers
            .lock()
            .get(op)
            .is_some_and(|b| b.is_blocking(now))
    }

    /// 操作的当前状态（未使用过的操作视为 Closed）
    pub fn state(&self, op: &str) -> CircuitState {
        self.breakers
            .lock()
            .get(op)
            .map_or(CircuitState::Closed, CircuitBreaker::state)
    }

    pub fn status(&self, op: &str) -> Option<CircuitStatus> {
        let now = self.clock.now();
        self.breakers.lock().get(op).map(|b| b.status(op, now))
    }

    /// 所有熔断器状态（按名称排序）
    pub fn all_status(&self) -> Vec<CircuitStatus> {
        let now = self.clock.now();
        let mut list: Vec<_> = self
            .breakers
            .lock()
            .iter()
            .map(|(name, b)| b.status(name, now))
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// 人工复位单个熔断器，返回是否存在
    pub fn reset(&self, op: &str) -> bool {
        match self.breakers.lock().get_mut(op) {
            Some(breaker) => {
                breaker.reset();
                info!(op, "Circuit breaker manually reset");
                true
            },
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values_mut() {
            breaker.reset();
        }
        info!("All circuit breakers reset");
    }
}

/// 调用许可
///
/// 持有 HalfOpen 下唯一的试探名额时，未结算即被丢弃（调用方取消了调用）
/// 视为试探失败。
#[must_use = "an unsettled permit abandons the call when dropped"]
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    registry: &'a CircuitBreakerRegistry,
    op: &'a str,
    trial: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// 是否占用了 HalfOpen 试探名额
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.registry.record_success(self.op);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.registry.record_failure(self.op);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.registry.abandon_trial(self.op);
        }
    }
}
