//! # 统计工具
//!
//! 有界环形缓冲区与延迟统计，供健康检查、重试历史和速度控制性能窗口共用。

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// 有界环形缓冲区
///
/// 写满后新元素覆盖最旧元素，保证内存占用恒定。
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// 创建指定容量的缓冲区（容量至少为 1）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 追加元素，返回被挤出的最旧元素（如有）
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 最新元素
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// 从旧到新迭代
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// 延迟统计（毫秒）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStatistics {
    pub sample_count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub std_dev_ms: f64,
}

impl LatencyStatistics {
    /// 计算延迟统计
    ///
    /// 空输入返回全零统计。
    pub fn calculate<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Duration>,
    {
        let mut sorted: Vec<f64> = samples
            .into_iter()
            .map(|d| d.as_micros() as f64 / 1000.0)
            .collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let avg = sorted.iter().sum::<f64>() / n;
        let variance = sorted
            .iter()
            .map(|x| {
                let diff = x - avg;
                diff * diff
            })
            .sum::<f64>()
            / n;

        Self {
            sample_count: sorted.len(),
            avg_ms: avg,
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            std_dev_ms: variance.sqrt(),
        }
    }
}

/// 最近秩百分位数（输入必须已升序排列且非空）
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
