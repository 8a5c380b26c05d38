//! FirmwareGateway 集成测试
//!
//! 使用 `MockTransport` 编排固件行为，`ManualClock` 控制时间（重试退避、
//! 缓存 TTL、熔断恢复、降级窗口），所有测试与真实时间无关。

use async_trait::async_trait;
use crossbeam_channel::{Receiver, unbounded};
use oht_driver::{
    CircuitState, FirmwareGateway, GatewayBuilder, GatewayConfig, GatewayError, LINK_BREAKER,
    RetryConfig,
};
use oht_protocol::{ConfigUpdate, ControlTrigger, FirmwareCommand};
use oht_tools::{ManualClock, SystemClock};
use oht_transport::{Endpoint, FirmwareTransport, HealthReply, MockTransport, TransportError};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

struct Harness {
    gateway: FirmwareGateway,
    mock: Arc<MockTransport>,
    clock: Arc<ManualClock>,
    triggers: Receiver<ControlTrigger>,
}

/// 默认配置，关闭抖动以便精确断言退避时长
fn test_config() -> GatewayConfig {
    GatewayConfig {
        retry: RetryConfig {
            jitter_enabled: false,
            ..RetryConfig::default()
        },
        ..GatewayConfig::default()
    }
}

fn harness(config: GatewayConfig) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let mock = Arc::new(MockTransport::with_clock(clock.clone()));
    let (tx, rx) = unbounded();
    let gateway = GatewayBuilder::new(mock.clone())
        .config(config)
        .clock(clock.clone())
        .trigger_sender(tx)
        .build()
        .expect("valid config");
    Harness {
        gateway,
        mock,
        clock,
        triggers: rx,
    }
}

async fn fail_health_checks(h: &Harness, n: usize) {
    for _ in 0..n {
        assert!(!h.gateway.check_health().await.healthy);
    }
}

#[tokio::test]
async fn test_robot_status_served_from_cache_within_ttl() {
    let h = harness(test_config());

    let first = h.gateway.get_robot_status().await;
    assert!(first.success);
    assert!(!first.cached);
    assert_eq!(first.payload.as_ref().unwrap().robot_id, "OHT-50-001");

    for _ in 0..5 {
        let again = h.gateway.get_robot_status().await;
        assert!(again.success);
        assert!(again.cached);
        assert_eq!(again.payload, first.payload);
    }
    assert_eq!(h.mock.call_count(Endpoint::RobotStatus), 1);
    assert_eq!(h.gateway.metrics().snapshot().cache_hits, 5);

    h.clock.advance(Duration::from_secs(1));
    let refreshed = h.gateway.get_robot_status().await;
    assert!(!refreshed.cached);
    assert_eq!(h.mock.call_count(Endpoint::RobotStatus), 2);
}

#[tokio::test]
async fn test_commands_never_cached() {
    let h = harness(test_config());
    for _ in 0..3 {
        assert!(h.gateway.send_command(FirmwareCommand::Pause).await.success);
    }
    assert_eq!(h.mock.call_count(Endpoint::Command), 3);
}

#[tokio::test]
async fn test_health_failures_open_link_then_reads_fall_back_and_commands_fail() {
    let h = harness(test_config());
    h.mock.set_offline(true);

    fail_health_checks(&h, 4).await;
    assert_eq!(h.gateway.breakers().state(LINK_BREAKER), CircuitState::Closed);
    assert!(h.triggers.try_recv().is_err());

    fail_health_checks(&h, 1).await;
    assert_eq!(h.gateway.breakers().state(LINK_BREAKER), CircuitState::Open);
    assert!(matches!(
        h.triggers.try_recv(),
        Ok(ControlTrigger::FirmwareLost { .. })
    ));
    assert!(!h.gateway.is_connected());

    let status = h.gateway.get_robot_status().await;
    assert!(status.success);
    assert!(status.fallback_mode);
    assert_eq!(status.circuit_state, CircuitState::Open);
    assert!(status.payload.unwrap().fallback_mode);

    let telemetry = h.gateway.get_telemetry().await;
    assert!(telemetry.success && telemetry.fallback_mode);

    let cmd = h
        .gateway
        .send_command(FirmwareCommand::Move {
            target_position: 10.0,
            speed: 1.0,
        })
        .await;
    assert!(!cmd.success);
    assert!(!cmd.fallback_mode);
    assert!(cmd.error.unwrap().is_circuit_open());

    // 熔断期间没有任何读写请求到达固件
    assert_eq!(h.mock.call_count(Endpoint::RobotStatus), 0);
    assert_eq!(h.mock.call_count(Endpoint::Command), 0);
    assert_eq!(h.gateway.metrics().snapshot().circuit_rejections, 3);
}

#[tokio::test]
async fn test_emergency_stop_bypasses_open_circuit_and_never_falls_back() {
    let h = harness(test_config());
    h.mock.set_offline(true);
    fail_health_checks(&h, 5).await;

    let resp = h.gateway.emergency_stop().await;
    assert!(!resp.success);
    assert!(!resp.fallback_mode);
    assert!(matches!(
        resp.error,
        Some(GatewayError::Transport(TransportError::Connection(_)))
    ));
    // 1 次首发 + 3 次重试
    assert_eq!(h.mock.call_count(Endpoint::EmergencyStop), 4);

    h.mock.set_offline(false);
    let resp = h.gateway.emergency_stop().await;
    assert!(resp.success);
    assert!(resp.payload.unwrap().success);
}

#[tokio::test]
async fn test_transient_read_failures_retried_with_backoff() {
    let h = harness(test_config());
    h.mock.fail_next(Endpoint::Telemetry, 2, TransportError::Timeout);

    let resp = h.gateway.get_telemetry().await;
    assert!(resp.success);
    assert!(!resp.fallback_mode);
    assert_eq!(h.mock.call_count(Endpoint::Telemetry), 3);
    assert_eq!(
        h.clock.recorded_sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(resp.response_time, Duration::from_secs(3));
}

#[tokio::test]
async fn test_read_failure_without_fallback_propagates_error() {
    let mut config = test_config();
    config.fallback.enabled = false;
    let h = harness(config);
    h.mock.set_offline(true);

    let resp = h.gateway.get_robot_status().await;
    assert!(!resp.success);
    assert!(!resp.fallback_mode);
    assert!(resp.payload.is_none());
    assert_eq!(h.mock.call_count(Endpoint::RobotStatus), 4);
    assert_eq!(
        h.clock.recorded_sleeps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );

    let snap = h.gateway.metrics().snapshot();
    assert_eq!(snap.failed_requests, 1);
    assert!(
        snap.operations["get_robot_status"]
            .last_error
            .as_deref()
            .unwrap()
            .contains("offline")
    );
}

#[tokio::test]
async fn test_per_operation_breaker_opens_after_repeated_failures() {
    let mut config = test_config();
    config.retry.max_retries = 0;
    let h = harness(config);
    h.mock.set_offline(true);

    for _ in 0..5 {
        assert!(!h.gateway.get_modules_status().await.success);
    }
    assert_eq!(h.gateway.breakers().state("get_modules_status"), CircuitState::Open);

    let resp = h.gateway.get_modules_status().await;
    assert!(resp.error.unwrap().is_circuit_open());
    assert_eq!(h.mock.call_count(Endpoint::Modules), 5);

    // 其他操作不受影响
    h.mock.set_offline(false);
    assert!(h.gateway.get_diagnostics().await.success);

    // 恢复超时后允许一次试探，成功即关闭
    h.clock.advance(Duration::from_secs(60));
    let resp = h.gateway.get_modules_status().await;
    assert!(resp.success);
    assert_eq!(resp.circuit_state, CircuitState::Closed);
    assert_eq!(resp.payload.unwrap().len(), 4);
}

#[tokio::test]
async fn test_invalid_command_rejected_without_io() {
    let h = harness(test_config());

    let resp = h
        .gateway
        .send_command(FirmwareCommand::Move {
            target_position: 5.0,
            speed: -1.0,
        })
        .await;
    assert!(!resp.success);
    assert!(matches!(resp.error, Some(GatewayError::InvalidRequest(_))));

    let resp = h.gateway.update_config(ConfigUpdate::MaxSpeed(0.0)).await;
    assert!(matches!(resp.error, Some(GatewayError::InvalidRequest(_))));

    let resp = h.gateway.get_module_status(0).await;
    assert!(matches!(resp.error, Some(GatewayError::InvalidRequest(_))));

    assert_eq!(h.mock.total_calls(), 0);
    assert!(h.clock.recorded_sleeps().is_empty());
}

#[tokio::test]
async fn test_command_rejected_by_firmware_not_retried() {
    let h = harness(test_config());
    h.mock.set_response(
        Endpoint::Command,
        json!({"success": false, "message": "robot busy"}),
    );

    let resp = h.gateway.send_command(FirmwareCommand::Resume).await;
    assert!(!resp.success);
    assert_eq!(
        resp.error,
        Some(GatewayError::Rejected("robot busy".to_string()))
    );
    assert_eq!(h.mock.call_count(Endpoint::Command), 1);
}

#[tokio::test]
async fn test_command_wire_body() {
    let h = harness(test_config());
    let resp = h
        .gateway
        .send_command(FirmwareCommand::Dock {
            station_id: "S3".into(),
        })
        .await;
    assert!(resp.success);
    assert_eq!(
        h.mock.posted_bodies(Endpoint::Command),
        vec![json!({"type": "dock", "parameters": {"station_id": "S3"}})]
    );

    let resp = h.gateway.update_config(ConfigUpdate::MaxSpeed(1.5)).await;
    assert!(resp.success);
    assert_eq!(
        h.mock.posted_bodies(Endpoint::Config),
        vec![json!({"key": "max_speed", "value": 1.5})]
    );
}

#[tokio::test]
async fn test_malformed_payload_treated_as_failure() {
    let h = harness(test_config());
    h.mock
        .set_response(Endpoint::RobotStatus, json!({"status": 5}));

    let resp = h.gateway.get_robot_status().await;
    // 畸形响应可重试，耗尽后读路径降级
    assert_eq!(h.mock.call_count(Endpoint::RobotStatus), 4);
    assert!(resp.success);
    assert!(resp.fallback_mode);
    assert_eq!(
        h.gateway.breakers().status("get_robot_status").unwrap().failure_count,
        1
    );
}

#[tokio::test]
async fn test_unknown_module_is_plain_failure() {
    let h = harness(test_config());

    let resp = h.gateway.get_module_status(2).await;
    assert!(resp.success);
    assert_eq!(resp.payload.unwrap().name, "safety");

    let resp = h.gateway.get_module_status(9).await;
    assert!(!resp.success);
    assert!(!resp.fallback_mode);
    // 404 不可重试
    assert_eq!(h.mock.call_count(Endpoint::Module(9)), 1);
}

#[tokio::test]
async fn test_fallback_exhaustion_reports_unrecoverable() {
    let mut config = test_config();
    config.fallback.max_duration = Duration::from_secs(10);
    let h = harness(config);
    h.mock.set_offline(true);
    fail_health_checks(&h, 5).await;
    assert!(matches!(
        h.triggers.try_recv(),
        Ok(ControlTrigger::FirmwareLost { .. })
    ));

    assert!(h.gateway.get_robot_status().await.fallback_mode);

    h.clock.advance(Duration::from_secs(11));
    let resp = h.gateway.get_robot_status().await;
    assert!(!resp.success);
    assert!(!resp.fallback_mode);
    assert!(matches!(
        h.triggers.try_recv(),
        Ok(ControlTrigger::FirmwareUnrecoverable { .. })
    ));
    assert!(h.gateway.fallback().is_exhausted());

    // 只上报一次
    assert!(!h.gateway.get_telemetry().await.success);
    assert!(h.triggers.try_recv().is_err());
}

#[tokio::test]
async fn test_unrecoverable_reported_after_fallback_queried() {
    let mut config = test_config();
    config.fallback.max_duration = Duration::from_secs(10);
    let h = harness(config);
    h.mock.set_offline(true);
    fail_health_checks(&h, 5).await;
    let _ = h.triggers.try_recv();

    h.clock.advance(Duration::from_secs(11));
    assert!(!h.gateway.fallback().is_active());
    assert!(h.gateway.fallback().is_exhausted());
    let _ = h.gateway.health_snapshot();

    assert!(!h.gateway.get_robot_status().await.success);
    assert!(matches!(
        h.triggers.try_recv(),
        Ok(ControlTrigger::FirmwareUnrecoverable { .. })
    ));
    assert!(!h.gateway.check_health().await.healthy);
    assert!(h.triggers.try_recv().is_err());
}

#[tokio::test]
async fn test_unrecoverable_reported_by_health_check() {
    let mut config = test_config();
    config.fallback.max_duration = Duration::from_secs(10);
    let h = harness(config);
    h.mock.set_offline(true);
    fail_health_checks(&h, 5).await;
    let _ = h.triggers.try_recv();

    h.clock.advance(Duration::from_secs(11));
    assert!(!h.gateway.fallback().is_active());
    assert!(!h.gateway.check_health().await.healthy);
    assert!(matches!(
        h.triggers.try_recv(),
        Ok(ControlTrigger::FirmwareUnrecoverable { .. })
    ));
}

#[tokio::test]
async fn test_link_recovery_reports_restored() {
    let h = harness(test_config());
    h.mock.set_offline(true);
    fail_health_checks(&h, 5).await;
    let _ = h.triggers.try_recv();

    h.mock.set_offline(false);
    let check = h.gateway.check_health().await;
    assert!(check.healthy);
    assert_eq!(h.triggers.try_recv(), Ok(ControlTrigger::FirmwareRestored));
    assert_eq!(h.gateway.breakers().state(LINK_BREAKER), CircuitState::Closed);
    assert!(h.gateway.is_connected());
    assert!(!h.gateway.fallback().is_active());

    let status = h.gateway.get_robot_status().await;
    assert!(status.success && !status.fallback_mode);
}

#[tokio::test]
async fn test_health_snapshot_serializes() {
    let h = harness(test_config());
    h.gateway.check_health().await;
    h.gateway.get_robot_status().await;

    let snapshot = h.gateway.health_snapshot();
    assert!(snapshot.firmware_connected);
    assert_eq!(snapshot.last_heartbeat_age_ms, Some(0));
    assert_eq!(snapshot.health.total_checks, 1);

    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["metrics"]["successful_requests"], 1);
    assert!(value["breakers"].is_array());

    let resp = serde_json::to_value(h.gateway.get_robot_status().await).unwrap();
    assert_eq!(resp["cached"], true);
    assert_eq!(resp["circuit_state"], "closed");
    assert!(resp["error"].is_null());
}

#[derive(Debug)]
struct HangingTransport;

#[async_trait]
impl FirmwareTransport for HangingTransport {
    async fn get(&self, _endpoint: Endpoint) -> Result<Value, TransportError> {
        std::future::pending().await
    }

    async fn post(&self, _endpoint: Endpoint, _body: Value) -> Result<Value, TransportError> {
        std::future::pending().await
    }

    async fn health(&self) -> Result<HealthReply, TransportError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_hung_firmware_bounded_by_request_timeout() {
    let config = GatewayConfig {
        request_timeout: Duration::from_millis(20),
        retry: RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        },
        ..GatewayConfig::default()
    };
    let gateway = GatewayBuilder::new(Arc::new(HangingTransport))
        .config(config)
        .clock(Arc::new(SystemClock))
        .build()
        .unwrap();

    let resp = gateway.get_diagnostics().await;
    assert!(!resp.success);
    assert_eq!(
        resp.error,
        Some(GatewayError::Timeout(Duration::from_millis(20)))
    );
    assert_eq!(gateway.metrics().snapshot().timeouts, 1);
}

/// 可切换为“挂起不返回”的模拟固件
#[derive(Debug)]
struct StallingTransport {
    inner: Arc<MockTransport>,
    stalled: AtomicBool,
}

impl StallingTransport {
    async fn stall_if_set(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl FirmwareTransport for StallingTransport {
    async fn get(&self, endpoint: Endpoint) -> Result<Value, TransportError> {
        self.stall_if_set().await;
        self.inner.get(endpoint).await
    }

    async fn post(&self, endpoint: Endpoint, body: Value) -> Result<Value, TransportError> {
        self.stall_if_set().await;
        self.inner.post(endpoint, body).await
    }

    async fn health(&self) -> Result<HealthReply, TransportError> {
        self.stall_if_set().await;
        self.inner.health().await
    }
}

#[tokio::test]
async fn test_cancelled_half_open_trial_does_not_wedge_breaker() {
    let mut config = test_config();
    config.retry.max_retries = 0;
    config.breaker.failure_threshold = 1;
    config.breaker.recovery_timeout = Duration::from_secs(10);
    let clock = Arc::new(ManualClock::new());
    let transport = Arc::new(StallingTransport {
        inner: Arc::new(MockTransport::with_clock(clock.clone())),
        stalled: AtomicBool::new(false),
    });
    let gateway = GatewayBuilder::new(transport.clone())
        .config(config)
        .clock(clock.clone())
        .build()
        .unwrap();

    transport.inner.set_offline(true);
    assert!(!gateway.get_modules_status().await.success);
    assert_eq!(gateway.breakers().state("get_modules_status"), CircuitState::Open);

    // 恢复窗口后的试探调用挂起，调用方放弃等待
    clock.advance(Duration::from_secs(10));
    transport.stalled.store(true, Ordering::SeqCst);
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), gateway.get_modules_status()).await;
    assert!(abandoned.is_err());
    assert_eq!(gateway.breakers().state("get_modules_status"), CircuitState::Open);

    // 固件恢复后，下一个恢复窗口的试探正常关闭熔断器
    transport.stalled.store(false, Ordering::SeqCst);
    transport.inner.set_offline(false);
    let resp = gateway.get_modules_status().await;
    assert!(resp.error.unwrap().is_circuit_open());

    clock.advance(Duration::from_secs(10));
    let resp = gateway.get_modules_status().await;
    assert!(resp.success);
    assert_eq!(resp.circuit_state, CircuitState::Closed);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let mut config = GatewayConfig::default();
    config.breaker.failure_threshold = 0;
    let err = GatewayBuilder::new(Arc::new(MockTransport::new()))
        .config(config)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("failure_threshold"));
}
