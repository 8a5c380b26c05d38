//! 读请求短时缓存
//!
//! 只缓存已校验的读结果（状态/遥测/安全），写请求与命令从不缓存。

use oht_tools::Clock;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 按操作名缓存 JSON 载荷，固定 TTL
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// TTL 内的缓存值；过期条目顺带删除
    pub fn get(&self, key: &str) -> Option<Value> {
        if self.ttl.is_zero() {
            return None;
        }
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored_at, value)) if now.saturating_duration_since(*stored_at) < self.ttl => {
                Some(value.clone())
            },
            Some(_) => {
                entries.remove(key);
                None
            },
            None => None,
        }
    }

    pub fn put(&self, key: &str, value: Value) {
        if self.ttl.is_zero() {
            return;
        }
        let now = self.clock.now();
        self.entries.lock().insert(key.to_string(), (now, value));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oht_tools::ManualClock;
    use serde_json::json;

    #[test]
    fn test_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::new(Duration::from_millis(500), clock.clone());
        cache.put("get_robot_status", json!({"status": "idle"}));

        clock.advance(Duration::from_millis(499));
        assert_eq!(cache.get("get_robot_status"), Some(json!({"status": "idle"})));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("get_robot_status"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::new(Duration::ZERO, clock);
        cache.put("k", json!(1));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_invalidate() {
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::new(Duration::from_secs(1), clock);
        cache.put("a", json!(1));
        cache.put("b", json!(2));
        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
        cache.clear();
        assert!(cache.is_empty());
    }
}
