//! 时钟抽象
//!
//! 控制面所有与时间相关的判断（熔断恢复、重试退避、降级窗口、缓存 TTL、
//! 响应时间预算）都通过 [`Clock`] 读取时间。生产环境使用 [`SystemClock`]；
//! 测试注入 [`ManualClock`] 并显式推进，不依赖真实时间或环境变量。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

/// 单调时间源，附带异步休眠
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// 当前单调时刻
    fn now(&self) -> Instant;

    /// 挂起当前任务 `duration`
    async fn sleep(&self, duration: Duration);
}

/// 真实时间：`Instant::now()` 与 `tokio::time::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 手动推进的时钟，用于确定性测试
///
/// `sleep` 记录请求的时长并把时钟推进同样的时长后立即返回，重试退避可以
/// 被精确断言。
///
/// ```
/// use oht_tools::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let t0 = clock.now();
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now() - t0, Duration::from_secs(5));
/// assert!(clock.recorded_sleeps().is_empty());
/// ```
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// 推进时间
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// 创建以来累计推进的时长
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }

    /// 按调用顺序返回传给 [`Clock::sleep`] 的所有时长
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}
