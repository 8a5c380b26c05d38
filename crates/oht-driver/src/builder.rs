//! Builder 模式实现
//!
//! 提供链式构造 [`FirmwareGateway`] 实例的便捷方式。

use crossbeam_channel::Sender;
use oht_protocol::ControlTrigger;
use oht_tools::{Clock, ConfigError, SystemClock};
use oht_transport::FirmwareTransport;
use std::sync::Arc;

use crate::gateway::{FirmwareGateway, GatewayConfig};

/// FirmwareGateway Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use oht_driver::{GatewayBuilder, GatewayConfig};
/// use oht_transport::HttpTransport;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let transport = HttpTransport::new("http://127.0.0.1:8081", Duration::from_secs(10)).unwrap();
/// let gateway = GatewayBuilder::new(Arc::new(transport))
///     .config(GatewayConfig::default())
///     .build()
///     .unwrap();
/// ```
pub struct GatewayBuilder {
    transport: Arc<dyn FirmwareTransport>,
    clock: Option<Arc<dyn Clock>>,
    config: GatewayConfig,
    triggers: Option<Sender<ControlTrigger>>,
}

impl GatewayBuilder {
    pub fn new(transport: Arc<dyn FirmwareTransport>) -> Self {
        Self {
            transport,
            clock: None,
            config: GatewayConfig::default(),
            triggers: None,
        }
    }

    /// 设置网关配置（可选，默认使用固件服务的原始常量）
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// 注入时钟（可选，默认 [`SystemClock`]）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 链路丢失/恢复与降级耗尽事件的接收方（通常是状态机的触发通道）
    pub fn trigger_sender(mut self, sender: Sender<ControlTrigger>) -> Self {
        self.triggers = Some(sender);
        self
    }

    /// 校验配置并构造网关
    pub fn build(self) -> Result<FirmwareGateway, ConfigError> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        Ok(FirmwareGateway::new(
            self.config,
            self.transport,
            clock,
            self.triggers,
        ))
    }
}
