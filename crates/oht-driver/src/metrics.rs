//! 网关指标
//!
//! 热路径计数器使用原子变量（Relaxed），按操作统计放在一把锁内。

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 单个操作的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_response_time_ms: f64,
    pub last_error: Option<String>,
}

impl OperationStats {
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_response_time_ms / self.requests as f64
        }
    }
}

/// 网关指标（线程安全）
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    circuit_rejections: AtomicU64,
    cache_hits: AtomicU64,
    fallback_responses: AtomicU64,
    timeouts: AtomicU64,
    operations: Mutex<BTreeMap<String, OperationStats>>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, op: &str, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        let mut ops = self.operations.lock();
        let stats = ops.entry(op.to_string()).or_default();
        stats.requests += 1;
        stats.successes += 1;
        stats.total_response_time_ms += response_time.as_secs_f64() * 1000.0;
    }

    pub fn record_failure(&self, op: &str, response_time: Duration, error: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        let mut ops = self.operations.lock();
        let stats = ops.entry(op.to_string()).or_default();
        stats.requests += 1;
        stats.failures += 1;
        stats.total_response_time_ms += response_time.as_secs_f64() * 1000.0;
        stats.last_error = Some(error.to_string());
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallback_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取快照（各计数器独立读取，非原子一致）
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallback_responses: self.fallback_responses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            operations: self.operations.lock().clone(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successful_requests,
            &self.failed_requests,
            &self.circuit_rejections,
            &self.cache_hits,
            &self.fallback_responses,
            &self.timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.operations.lock().clear();
    }
}

/// 指标快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub circuit_rejections: u64,
    pub cache_hits: u64,
    pub fallback_responses: u64,
    pub timeouts: u64,
    pub operations: BTreeMap<String, OperationStats>,
}

impl MetricsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}
