//! 固件网关
//!
//! 上层与固件通信的唯一入口，组合熔断、重试、健康探测、降级与读缓存。
//!
//! # 调用流程
//!
//! 1. 链路熔断器（由健康探测驱动）或操作自身熔断器拒绝时立即失败，不发起 I/O
//! 2. 否则经 [`RetryExecutor`] 执行，每次尝试带 `request_timeout`
//! 3. 成功：记录指标、熔断器成功，`connected = true`，刷新心跳
//! 4. 失败：记录指标、熔断器失败，`connected = false`；读路径（状态/遥测/安全）
//!    交给 [`FallbackProvider`] 返回合成数据，写路径与命令直接返回失败
//!
//! 每个公共操作都返回 [`GatewayResponse`]，失败被表示而不是被抛出。
//! 急停使用 [`CommandPriority::Emergency`]：跳过熔断门控，失败从不降级。

use crossbeam_channel::Sender;
use oht_protocol::{
    CommandAck, ConfigUpdate, ControlTrigger, FirmwareCommand, ModuleStatus, RobotStatus,
    SafetyStatus, Telemetry, Validate, decode,
};
use oht_tools::{Clock, ConfigError};
use oht_transport::{Endpoint, FirmwareTransport};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::ResponseCache;
use crate::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitPermit, CircuitState, CircuitStatus,
};
use crate::command::CommandPriority;
use crate::fallback::{FallbackConfig, FallbackProvider, FallbackState, FallbackStatistics};
use crate::health::{HealthCheck, HealthConfig, HealthProbe, HealthReport};
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use crate::retry::{RetryConfig, RetryExecutor, RetryStatistics};
use crate::GatewayError;

/// 链路熔断器的名称（只由健康探测驱动）
pub const LINK_BREAKER: &str = "link";

/// 网关配置
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// 降级合成数据使用的机器人编号
    pub robot_id: String,
    /// 单次请求超时
    pub request_timeout: Duration,
    /// 读缓存 TTL（0 表示关闭缓存）
    pub cache_ttl: Duration,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub fallback: FallbackConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            robot_id: "OHT-50-001".to_string(),
            request_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(1),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            health: HealthConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "firmware.request_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.health.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "health.max_consecutive_failures",
                "must be greater than 0",
            ));
        }
        if self.health.timeout.is_zero() {
            return Err(ConfigError::invalid("health.timeout_ms", "must be greater than 0"));
        }
        self.retry.validate()
    }
}

/// 网关调用结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse<T> {
    pub success: bool,
    pub payload: Option<T>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<GatewayError>,
    #[serde(rename = "response_time_ms", serialize_with = "serialize_millis")]
    pub response_time: Duration,
    /// 调用时的熔断状态快照
    pub circuit_state: CircuitState,
    /// 载荷是否为降级合成数据
    pub fallback_mode: bool,
    /// 是否命中读缓存
    pub cached: bool,
}

fn serialize_error<S: Serializer>(error: &Option<GatewayError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_micros() as f64 / 1000.0)
}

impl<T> GatewayResponse<T> {
    fn ok(payload: T, response_time: Duration, circuit_state: CircuitState) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            response_time,
            circuit_state,
            fallback_mode: false,
            cached: false,
        }
    }

    fn failure(error: GatewayError, response_time: Duration, circuit_state: CircuitState) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error),
            response_time,
            circuit_state,
            fallback_mode: false,
            cached: false,
        }
    }

    /// 转换为 `Result`（成功但无载荷视为协议错误）
    pub fn into_result(self) -> Result<T, GatewayError> {
        match (self.payload, self.error) {
            (_, Some(e)) => Err(e),
            (Some(p), None) => Ok(p),
            (None, None) => Err(GatewayError::Protocol(oht_protocol::ProtocolError::Malformed(
                "response carried no payload".into(),
            ))),
        }
    }
}

/// 网关整体健康快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewaySnapshot {
    pub firmware_connected: bool,
    pub connection_status: bool,
    pub last_heartbeat_age_ms: Option<u64>,
    pub link: Option<CircuitStatus>,
    pub breakers: Vec<CircuitStatus>,
    pub health: HealthReport,
    pub fallback: FallbackStatistics,
    pub retry: RetryStatistics,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    last_heartbeat: Option<Instant>,
    lost_reported: bool,
}

/// 固件网关
#[derive(Debug)]
pub struct FirmwareGateway {
    config: GatewayConfig,
    transport: Arc<dyn FirmwareTransport>,
    clock: Arc<dyn Clock>,
    breakers: CircuitBreakerRegistry,
    retry: RetryExecutor,
    health: HealthProbe,
    fallback: FallbackProvider,
    cache: ResponseCache,
    metrics: GatewayMetrics,
    link: Mutex<LinkState>,
    triggers: Option<Sender<ControlTrigger>>,
}

impl FirmwareGateway {
    pub(crate) fn new(
        config: GatewayConfig,
        transport: Arc<dyn FirmwareTransport>,
        clock: Arc<dyn Clock>,
        triggers: Option<Sender<ControlTrigger>>,
    ) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(config.breaker, clock.clone()),
            retry: RetryExecutor::new(config.retry, clock.clone()),
            health: HealthProbe::new(transport.clone(), clock.clone(), config.health),
            fallback: FallbackProvider::new(config.fallback, config.robot_id.clone(), clock.clone()),
            cache: ResponseCache::new(config.cache_ttl, clock.clone()),
            metrics: GatewayMetrics::new(),
            link: Mutex::new(LinkState::default()),
            config,
            transport,
            clock,
            triggers,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn fallback(&self) -> &FallbackProvider {
        &self.fallback
    }

    pub fn health_probe(&self) -> &HealthProbe {
        &self.health
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    // ==================== 读路径（可缓存、可降级） ====================

    /// 机器人运行状态
    pub async fn get_robot_status(&self) -> GatewayResponse<RobotStatus> {
        let resp = self
            .read("get_robot_status", Endpoint::RobotStatus, true)
            .await;
        if let Some(status) = resp.payload.as_ref().filter(|_| !resp.cached) {
            self.fallback.remember_status(status);
        }
        self.degrade(resp, FallbackProvider::robot_status)
    }

    /// 当前遥测
    pub async fn get_telemetry(&self) -> GatewayResponse<Telemetry> {
        let resp = self
            .read("get_telemetry", Endpoint::Telemetry, true)
            .await;
        if let Some(telemetry) = resp.payload.as_ref().filter(|_| !resp.cached) {
            self.fallback.remember_telemetry(telemetry);
        }
        self.degrade(resp, FallbackProvider::telemetry)
    }

    /// 安全子系统状态
    pub async fn get_safety_status(&self) -> GatewayResponse<SafetyStatus> {
        let resp = self
            .read("get_safety_status", Endpoint::SafetyStatus, true)
            .await;
        self.degrade(resp, FallbackProvider::safety_status)
    }

    // ==================== 读路径（不缓存、不降级） ====================

    /// 单个模块状态
    pub async fn get_module_status(&self, module_id: u8) -> GatewayResponse<ModuleStatus> {
        if module_id == 0 {
            return self.reject("get_module_status", "module_id 0 is reserved");
        }
        self.read("get_module_status", Endpoint::Module(module_id), false)
            .await
    }

    /// 所有模块状态
    pub async fn get_modules_status(&self) -> GatewayResponse<Vec<ModuleStatus>> {
        self.read("get_modules_status", Endpoint::Modules, false)
            .await
    }

    /// 固件配置（原样透传 JSON 对象）
    pub async fn get_configuration(&self) -> GatewayResponse<Value> {
        self.read("get_configuration", Endpoint::Config, false)
            .await
    }

    /// 固件诊断信息
    pub async fn get_diagnostics(&self) -> GatewayResponse<Value> {
        self.read("get_diagnostics", Endpoint::Diagnostics, false)
            .await
    }

    // ==================== 写路径（从不缓存、从不降级） ====================

    /// 下发机器人命令
    ///
    /// 参数在进入重试循环前校验；`EmergencyStop` 变体按急停优先级执行。
    pub async fn send_command(&self, command: FirmwareCommand) -> GatewayResponse<CommandAck> {
        const OP: &str = "send_command";
        if let Err(e) = command.validate() {
            return self.reject(OP, e.to_string());
        }
        let body = match serde_json::to_value(&command) {
            Ok(body) => body,
            Err(e) => return self.reject(OP, e.to_string()),
        };
        let priority = if matches!(command, FirmwareCommand::EmergencyStop) {
            CommandPriority::Emergency
        } else {
            CommandPriority::Normal
        };
        debug!(command = command.name(), "Sending firmware command");
        let resp = self.write(OP, Endpoint::Command, body, priority).await;
        self.cache.invalidate("get_robot_status");
        resp
    }

    /// 紧急停止
    ///
    /// 跳过熔断门控；失败立即可见，从不降级。
    pub async fn emergency_stop(&self) -> GatewayResponse<CommandAck> {
        warn!("Emergency stop requested");
        let body = json!({ "reason": "control_plane_emergency_stop" });
        let resp = self
            .write("emergency_stop", Endpoint::EmergencyStop, body, CommandPriority::Emergency)
            .await;
        self.cache.clear();
        if !resp.success {
            error!(error = ?resp.error, "Emergency stop could not be delivered to firmware");
        }
        resp
    }

    /// 更新固件配置
    pub async fn update_config(&self, update: ConfigUpdate) -> GatewayResponse<CommandAck> {
        const OP: &str = "update_config";
        if let Err(e) = update.validate() {
            return self.reject(OP, e.to_string());
        }
        let body = match serde_json::to_value(&update) {
            Ok(body) => body,
            Err(e) => return self.reject(OP, e.to_string()),
        };
        self.write(OP, Endpoint::Config, body, CommandPriority::Normal)
            .await
    }

    // ==================== 健康 ====================

    /// 执行一次健康探测并驱动链路熔断器
    ///
    /// 链路熔断器打开时上报 [`ControlTrigger::FirmwareLost`] 并开启降级；
    /// 恢复时上报 [`ControlTrigger::FirmwareRestored`]；降级窗口耗尽时上报
    /// [`ControlTrigger::FirmwareUnrecoverable`]。
    pub async fn check_health(&self) -> HealthCheck {
        let check = self.health.check_health().await;

        if check.healthy {
            self.breakers.record_success(LINK_BREAKER);
            let restored = {
                let mut link = self.link.lock();
                link.connected = true;
                link.last_heartbeat = Some(self.clock.now());
                std::mem::take(&mut link.lost_reported)
            };
            if restored {
                info!("Firmware link restored");
                self.fallback.mark_recovered();
                self.send_trigger(ControlTrigger::FirmwareRestored);
            }
            return check;
        }

        self.breakers.record_failure(LINK_BREAKER);
        let link_open = self.breakers.state(LINK_BREAKER) == CircuitState::Open;
        let newly_lost = {
            let mut link = self.link.lock();
            link.connected = false;
            let lost = link_open && !link.lost_reported;
            if lost {
                link.lost_reported = true;
            }
            lost
        };
        if newly_lost {
            let reason = check
                .error
                .clone()
                .unwrap_or_else(|| "health check failed".to_string());
            self.fallback.enable();
            self.send_trigger(ControlTrigger::FirmwareLost { reason });
        }
        if self.fallback.take_exhaustion() {
            self.report_unrecoverable("health_check");
        }
        check
    }

    /// 固件是否在线（最近一次调用成功且链路未熔断）
    pub fn is_connected(&self) -> bool {
        let connected = self.link.lock().connected;
        connected && self.breakers.state(LINK_BREAKER) != CircuitState::Open
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.link.lock().last_heartbeat
    }

    /// 网关整体健康快照（纯读取）
    pub fn health_snapshot(&self) -> GatewaySnapshot {
        let now = self.clock.now();
        let (connected, heartbeat) = {
            let link = self.link.lock();
            (link.connected, link.last_heartbeat)
        };
        GatewaySnapshot {
            firmware_connected: self.is_connected(),
            connection_status: connected,
            last_heartbeat_age_ms: heartbeat.map(|t| now.saturating_duration_since(t).as_millis() as u64),
            link: self.breakers.status(LINK_BREAKER),
            breakers: self.breakers.all_status(),
            health: self.health.report(),
            fallback: self.fallback.statistics(),
            retry: self.retry.statistics(),
            metrics: self.metrics.snapshot(),
        }
    }

    // ==================== 内部实现 ====================

    /// 操作对外呈现的熔断状态：链路熔断优先
    fn circuit_state(&self, op: &str) -> CircuitState {
        match self.breakers.state(LINK_BREAKER) {
            CircuitState::Open if self.breakers.is_blocking(LINK_BREAKER) => CircuitState::Open,
            _ => self.breakers.state(op),
        }
    }

    /// 熔断门控；急停直接放行
    fn admit<'a>(
        &'a self,
        op: &'a str,
        priority: CommandPriority,
    ) -> Result<CircuitPermit<'a>, GatewayError> {
        if priority.bypasses_breaker() {
            return Ok(self.breakers.bypass(op));
        }
        if self.breakers.is_blocking(LINK_BREAKER) {
            return Err(GatewayError::CircuitOpen { op: op.to_string() });
        }
        self.breakers.acquire(op)
    }

    fn reject<T>(&self, op: &str, reason: impl Into<String>) -> GatewayResponse<T> {
        let reason = reason.into();
        warn!(op, %reason, "Request rejected before dispatch");
        GatewayResponse::failure(
            GatewayError::InvalidRequest(reason),
            Duration::ZERO,
            self.circuit_state(op),
        )
    }

    fn send_trigger(&self, trigger: ControlTrigger) {
        if let Some(tx) = &self.triggers {
            let name = trigger.name();
            if tx.send(trigger).is_err() {
                debug!(trigger = name, "Trigger receiver dropped");
            }
        }
    }

    fn report_unrecoverable(&self, op: &str) {
        error!(op, "Firmware unreachable and fallback window exhausted");
        self.send_trigger(ControlTrigger::FirmwareUnrecoverable {
            reason: format!("{op}: firmware unreachable beyond fallback window"),
        });
    }

    /// 单次尝试：带超时的 GET + 解码校验
    async fn fetch<T>(&self, endpoint: Endpoint) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + Validate,
    {
        let value = self
            .with_timeout(self.transport.get(endpoint))
            .await??;
        Ok(decode(value)?)
    }

    /// 单次尝试：带超时的 POST + 确认解码
    async fn submit(&self, endpoint: Endpoint, body: Value) -> Result<CommandAck, GatewayError> {
        let value = self
            .with_timeout(self.transport.post(endpoint, body))
            .await??;
        let ack: CommandAck = decode(value)?;
        if !ack.success {
            return Err(GatewayError::Rejected(
                ack.message.unwrap_or_else(|| "no reason given".to_string()),
            ));
        }
        Ok(ack)
    }

    async fn with_timeout<F: Future>(&self, fut: F) -> Result<F::Output, GatewayError> {
        tokio::time::timeout(self.config.request_timeout, fut)
            .await
            .map_err(|_| {
                self.metrics.record_timeout();
                GatewayError::Timeout(self.config.request_timeout)
            })
    }

    async fn read<T>(
        &self,
        op: &'static str,
        endpoint: Endpoint,
        cacheable: bool,
    ) -> GatewayResponse<T>
    where
        T: DeserializeOwned + Validate + Serialize,
    {
        if cacheable {
            if let Some(payload) = self
                .cache
                .get(op)
                .and_then(|v| serde_json::from_value::<T>(v).ok())
            {
                self.metrics.record_cache_hit();
                return GatewayResponse {
                    cached: true,
                    ..GatewayResponse::ok(payload, Duration::ZERO, self.circuit_state(op))
                };
            }
        }

        let resp = self
            .execute(op, CommandPriority::Normal, || self.fetch::<T>(endpoint))
            .await;

        if cacheable && resp.success {
            if let Some(value) = resp.payload.as_ref().and_then(|p| serde_json::to_value(p).ok()) {
                self.cache.put(op, value);
            }
        }
        resp
    }

    async fn write(
        &self,
        op: &'static str,
        endpoint: Endpoint,
        body: Value,
        priority: CommandPriority,
    ) -> GatewayResponse<CommandAck> {
        self.execute(op, priority, || self.submit(endpoint, body.clone()))
            .await
    }

    async fn execute<T, F, Fut>(
        &self,
        op: &'static str,
        priority: CommandPriority,
        f: F,
    ) -> GatewayResponse<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let start = self.clock.now();

        let permit = match self.admit(op, priority) {
            Ok(permit) => permit,
            Err(e) => {
                self.metrics.record_circuit_rejection();
                warn!(op, "Circuit breaker open, request not dispatched");
                return GatewayResponse::failure(e, Duration::ZERO, self.circuit_state(op));
            },
        };

        let result = self.retry.execute_with_retry(op, f).await;
        let elapsed = self.clock.now().saturating_duration_since(start);

        match result {
            Ok(payload) => {
                self.metrics.record_success(op, elapsed);
                permit.success();
                {
                    let mut link = self.link.lock();
                    link.connected = true;
                    link.last_heartbeat = Some(self.clock.now());
                }
                self.fallback.mark_recovered();
                debug!(op, elapsed_ms = elapsed.as_millis() as u64, "Firmware call succeeded");
                GatewayResponse::ok(payload, elapsed, self.circuit_state(op))
            },
            Err(e) => {
                self.metrics.record_failure(op, elapsed, &e.to_string());
                permit.failure();
                self.link.lock().connected = false;
                error!(op, error = %e, "Firmware call failed");
                GatewayResponse::failure(e, elapsed, self.circuit_state(op))
            },
        }
    }

    /// 读路径失败时替换为降级数据
    fn degrade<T>(
        &self,
        resp: GatewayResponse<T>,
        synthesize: impl FnOnce(&FallbackProvider) -> T,
    ) -> GatewayResponse<T> {
        if resp.success {
            return resp;
        }
        if self.fallback.enable()
            && let FallbackState::Active { remaining } = self.fallback.check()
        {
            self.metrics.record_fallback();
            warn!(
                error = ?resp.error,
                remaining_s = remaining.as_secs(),
                "Serving fallback data"
            );
            return GatewayResponse {
                success: true,
                payload: Some(synthesize(&self.fallback)),
                error: None,
                fallback_mode: true,
                ..resp
            };
        }
        if self.fallback.take_exhaustion() {
            self.report_unrecoverable("read");
        }
        resp
    }
}
