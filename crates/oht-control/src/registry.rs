//! 服务注册表
//!
//! 按依赖顺序显式构造控制面的全部服务，并提供对称的关闭流程。服务之间
//! 只通过共享的触发通道单向通信：网关和安全执行器发送
//! [`ControlTrigger`]，由 [`Supervisor`](crate::Supervisor) 转交给状态机。

use crossbeam_channel::{Receiver, Sender, unbounded};
use oht_driver::{FirmwareGateway, GatewayBuilder};
use oht_protocol::ControlTrigger;
use oht_safety::{SafetyZoneEnforcer, SpeedGovernor, SpeedMode};
use oht_state::{FIRMWARE_SUBSYSTEM, StateHistoryEntry, StateMachine, SystemState};
use oht_tools::{Clock, SystemClock};
use oht_transport::{FirmwareTransport, HttpTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use crate::{ControlConfig, ControlError};

/// 控制面服务集合
#[derive(Debug)]
pub struct ServiceRegistry {
    config: ControlConfig,
    clock: Arc<dyn Clock>,
    gateway: Arc<FirmwareGateway>,
    governor: Arc<SpeedGovernor>,
    enforcer: Arc<SafetyZoneEnforcer>,
    state_machine: Arc<StateMachine>,
    trigger_tx: Sender<ControlTrigger>,
    trigger_rx: Receiver<ControlTrigger>,
    shut_down: AtomicBool,
}

impl ServiceRegistry {
    /// 使用给定传输与时钟构造全部服务
    pub fn init(
        config: ControlConfig,
        transport: Arc<dyn FirmwareTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        let (trigger_tx, trigger_rx) = unbounded();

        let gateway = GatewayBuilder::new(transport)
            .config(config.gateway_config())
            .clock(clock.clone())
            .trigger_sender(trigger_tx.clone())
            .build()?;
        let governor = Arc::new(SpeedGovernor::new(config.governor_config(), clock.clone()));
        let enforcer = SafetyZoneEnforcer::new(governor.clone(), config.zone_table()?, clock.clone())
            .with_trigger_sender(trigger_tx.clone());
        let state_machine = StateMachine::new(config.state_config(), clock.clone());
        state_machine.register_subsystem(FIRMWARE_SUBSYSTEM, "Firmware RPC link");

        info!(
            firmware = %config.firmware.base_url,
            robot_id = %config.firmware.robot_id,
            "Control plane services initialized"
        );

        Ok(Self {
            config,
            clock,
            gateway: Arc::new(gateway),
            governor,
            enforcer: Arc::new(enforcer),
            state_machine: Arc::new(state_machine),
            trigger_tx,
            trigger_rx,
            shut_down: AtomicBool::new(false),
        })
    }

    /// 通过 HTTP 连接 `[firmware].base_url`，使用真实时钟
    pub fn connect(config: ControlConfig) -> Result<Self, ControlError> {
        let transport = HttpTransport::new(
            config.firmware.base_url.clone(),
            std::time::Duration::from_millis(config.firmware.request_timeout_ms),
        )?;
        Self::init(config, Arc::new(transport), Arc::new(SystemClock))
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn gateway(&self) -> &Arc<FirmwareGateway> {
        &self.gateway
    }

    pub fn governor(&self) -> &Arc<SpeedGovernor> {
        &self.governor
    }

    pub fn enforcer(&self) -> &Arc<SafetyZoneEnforcer> {
        &self.enforcer
    }

    pub fn state_machine(&self) -> &Arc<StateMachine> {
        &self.state_machine
    }

    /// 供外部组件（操作员指令等）投递触发
    pub fn trigger_sender(&self) -> Sender<ControlTrigger> {
        self.trigger_tx.clone()
    }

    pub(crate) fn triggers(&self) -> &Receiver<ControlTrigger> {
        &self.trigger_rx
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// 关闭控制面
    ///
    /// 速度归零，运动中的状态先回到 Idle，再进入终止状态 Shutdown。
    /// 重复调用返回 `Ok(None)`。
    pub fn shutdown(&self) -> Result<Option<StateHistoryEntry>, ControlError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }
        info!("Shutting down control plane");

        if let Err(e) = self.governor.set_speed(0.0, SpeedMode::Manual, false) {
            error!(error = %e, "Failed to bring speed to zero during shutdown");
        }
        self.gateway.cache().clear();

        let sm = &self.state_machine;
        let current = sm.current_state();
        if current.is_terminal() {
            return Ok(None);
        }
        if matches!(
            current,
            SystemState::Initializing | SystemState::Moving | SystemState::Docking
        ) {
            sm.transition_to(SystemState::Idle, "stopping")?;
        }
        let entry = sm.transition_to(SystemState::Shutdown, "shutdown")?;

        let pending = self.trigger_rx.try_iter().count();
        if pending > 0 {
            warn!(pending, "Discarded undelivered triggers at shutdown");
        }
        Ok(Some(entry))
    }
}
