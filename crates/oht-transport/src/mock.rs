//! Mock 传输实现（用于测试与演示，无需固件进程）
//!
//! 默认返回 OHT-50 固件的样例数据；可编排：
//! - 离线（所有请求返回连接错误）
//! - 按端点排队的一次性错误
//! - 健康探测状态码
//! - 人为延迟（通过注入的 [`Clock`] 睡眠，`ManualClock` 下立即返回）
//!
//! 每个端点的调用次数和 POST 请求体都会被记录，供断言使用。

use async_trait::async_trait;
use oht_tools::Clock;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::{Endpoint, FirmwareTransport, HealthReply, TransportError};

#[derive(Debug, Default)]
struct MockState {
    offline: bool,
    health_status: u16,
    latency: Duration,
    failures: HashMap<Endpoint, VecDeque<TransportError>>,
    responses: HashMap<Endpoint, Value>,
    calls: HashMap<Endpoint, u64>,
    posted: Vec<(Endpoint, Value)>,
}

/// 内存固件传输
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// 创建在线的 Mock 固件（健康探测返回 200）
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                health_status: 200,
                ..MockState::default()
            }),
            clock: None,
        }
    }

    /// 使用指定时钟模拟延迟
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::new()
        }
    }

    /// 固件离线：所有请求（含健康探测）返回连接错误
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.state.lock().offline
    }

    /// 健康探测返回的 HTTP 状态码
    pub fn set_health_status(&self, status_code: u16) {
        self.state.lock().health_status = status_code;
    }

    /// 每次请求的模拟延迟（需要 `with_clock`）
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// 让 `endpoint` 接下来的 `times` 次请求返回 `error`
    pub fn fail_next(&self, endpoint: Endpoint, times: usize, error: TransportError) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(endpoint).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// 覆盖某端点的响应体
    pub fn set_response(&self, endpoint: Endpoint, body: Value) {
        self.state.lock().responses.insert(endpoint, body);
    }

    /// 某端点累计调用次数（含失败）
    pub fn call_count(&self, endpoint: Endpoint) -> u64 {
        self.state.lock().calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// 全部端点累计调用次数
    pub fn total_calls(&self) -> u64 {
        self.state.lock().calls.values().sum()
    }

    /// 某端点收到的 POST 请求体（按时间顺序）
    pub fn posted_bodies(&self, endpoint: Endpoint) -> Vec<Value> {
        self.state
            .lock()
            .posted
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, body)| body.clone())
            .collect()
    }

    /// 登记一次调用并决定结果（锁只在此函数内持有）
    fn record(&self, endpoint: Endpoint, body: Option<&Value>) -> (Duration, Result<(), TransportError>) {
        let mut state = self.state.lock();
        *state.calls.entry(endpoint).or_insert(0) += 1;
        if let Some(body) = body {
            state.posted.push((endpoint, body.clone()));
        }

        let outcome = if state.offline {
            Err(TransportError::Connection("firmware offline".to_string()))
        } else if let Some(err) = state.failures.get_mut(&endpoint).and_then(VecDeque::pop_front) {
            Err(err)
        } else {
            Ok(())
        };
        (state.latency, outcome)
    }

    async fn simulate_latency(&self, latency: Duration) {
        if latency.is_zero() {
            return;
        }
        if let Some(clock) = &self.clock {
            clock.sleep(latency).await;
        }
    }

    fn response_for(&self, endpoint: Endpoint) -> Result<Value, TransportError> {
        if let Some(body) = self.state.lock().responses.get(&endpoint) {
            return Ok(body.clone());
        }
        default_response(endpoint)
    }
}

/// 固件样例数据
fn default_response(endpoint: Endpoint) -> Result<Value, TransportError> {
    let body = match endpoint {
        Endpoint::RobotStatus => json!({
            "robot_id": "OHT-50-001",
            "status": "idle",
            "position": { "x": 150.5, "y": 200.3 },
            "battery_level": 87.0,
            "temperature": 42.5,
        }),
        Endpoint::Telemetry => json!({
            "motor_speed": 1500.0,
            "motor_temperature": 45.0,
            "dock_status": "ready",
            "safety_status": "normal",
        }),
        Endpoint::SafetyStatus => json!({
            "estop_active": false,
            "safety_status": "normal",
        }),
        Endpoint::Modules => json!([
            { "module_id": 1, "name": "power", "status": "online", "health": 0.98 },
            { "module_id": 2, "name": "safety", "status": "online", "health": 1.0 },
            { "module_id": 3, "name": "travel_motor", "status": "online", "health": 0.95 },
            { "module_id": 4, "name": "dock", "status": "online", "health": 0.97 },
        ]),
        Endpoint::Module(id @ 1..=4) => {
            let name = ["power", "safety", "travel_motor", "dock"][usize::from(id) - 1];
            json!({ "module_id": id, "name": name, "status": "online", "health": 0.97 })
        }
        Endpoint::Module(id) => {
            return Err(TransportError::Status {
                status: 404,
                body: format!("module {id} not found"),
            });
        }
        Endpoint::Config => json!({
            "max_speed": 2.0,
            "heartbeat_interval_ms": 1000,
            "log_level": "info",
        }),
        Endpoint::Diagnostics => json!({
            "uptime_s": 3600,
            "rs485_errors": 0,
            "modbus_timeouts": 0,
            "cpu_usage": 0.21,
        }),
        Endpoint::Command => json!({ "success": true, "message": "Command executed" }),
        Endpoint::EmergencyStop => json!({ "success": true, "message": "Emergency stop executed" }),
        Endpoint::Health => json!({ "status": "healthy" }),
    };
    Ok(body)
}

#[async_trait]
impl FirmwareTransport for MockTransport {
    async fn get(&self, endpoint: Endpoint) -> Result<Value, TransportError> {
        let (latency, outcome) = self.record(endpoint, None);
        self.simulate_latency(latency).await;
        trace!(%endpoint, ok = outcome.is_ok(), "mock GET");
        outcome?;
        self.response_for(endpoint)
    }

    async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, TransportError> {
        let (latency, outcome) = self.record(endpoint, Some(&body));
        self.simulate_latency(latency).await;
        trace!(%endpoint, ok = outcome.is_ok(), "mock POST");
        outcome?;
        match endpoint {
            Endpoint::Config => Ok(json!({ "success": true, "message": "Configuration updated" })),
            _ => self.response_for(endpoint),
        }
    }

    async fn health(&self) -> Result<HealthReply, TransportError> {
        let (latency, outcome) = self.record(Endpoint::Health, None);
        self.simulate_latency(latency).await;
        outcome?;
        Ok(HealthReply {
            status_code: self.state.lock().health_status,
        })
    }
}
