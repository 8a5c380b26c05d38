//! 监督循环
//!
//! 每个周期：
//! 1. 处理已到达的触发，探测不会推迟急停
//! 2. 通过网关执行一次健康探测（驱动链路熔断器与降级窗口）
//! 3. 把固件链路状态镜像到状态机的 `firmware` 子系统
//! 4. 把网关/安全执行器发出的触发交给状态机；急停同时下发给固件
//! 5. 首次探测成功后离开 Initializing，并检查停留超时规则
//!
//! [`Supervisor::run`] 另外在触发到达时立即处理，不等待下一个周期。

use crossbeam_channel::{Receiver, Select, bounded};
use oht_driver::{CircuitState, LINK_BREAKER};
use oht_protocol::ControlTrigger;
use oht_state::{FIRMWARE_SUBSYSTEM, StateHistoryEntry, SubsystemState, SystemState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{ControlError, ServiceRegistry};

/// 单个监督周期的结果
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub healthy: bool,
    pub firmware: SubsystemState,
    /// 本周期处理的触发数
    pub triggers: usize,
    /// 本周期发生的状态转换
    pub transitions: Vec<StateHistoryEntry>,
}

/// 控制面监督器
#[derive(Debug)]
pub struct Supervisor {
    registry: Arc<ServiceRegistry>,
    interval: Duration,
}

impl Supervisor {
    /// 以 `[health].check_interval_ms` 为周期
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        let interval = registry.config().check_interval();
        Self { registry, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// 执行一个监督周期
    pub async fn tick(&self) -> TickReport {
        let gateway = self.registry.gateway();
        let sm = self.registry.state_machine();

        let mut transitions = Vec::new();
        let mut triggers = self.drain_triggers(&mut transitions).await;

        let check = gateway.check_health().await;
        let (firmware, health) = if check.healthy {
            (SubsystemState::Online, 1.0)
        } else if gateway.fallback().is_exhausted() {
            (SubsystemState::Error, 0.0)
        } else if gateway.breakers().state(LINK_BREAKER) == CircuitState::Open {
            (SubsystemState::Offline, 0.0)
        } else {
            let max = gateway.health_probe().config().max_consecutive_failures.max(1);
            let streak = gateway.health_probe().consecutive_failures().min(max);
            (SubsystemState::Warning, 1.0 - f64::from(streak) / f64::from(max))
        };
        if let Err(e) = sm.update_subsystem_status(FIRMWARE_SUBSYSTEM, firmware, health) {
            error!(error = %e, "Failed to mirror firmware subsystem status");
        }

        triggers += self.drain_triggers(&mut transitions).await;

        if check.healthy && sm.current_state() == SystemState::Initializing {
            match sm.transition(SystemState::Initializing, SystemState::Idle, "initialized") {
                Ok(entry) => {
                    info!("Firmware reachable, control plane ready");
                    transitions.push(entry);
                },
                Err(e) => debug!(error = %e, "Initialization transition skipped"),
            }
        }
        transitions.extend(sm.poll_timeouts());

        TickReport {
            healthy: check.healthy,
            firmware,
            triggers,
            transitions,
        }
    }

    /// 处理所有待处理触发，不执行健康探测
    pub async fn route_triggers(&self) -> Vec<StateHistoryEntry> {
        let mut transitions = Vec::new();
        self.drain_triggers(&mut transitions).await;
        transitions
    }

    /// 处理所有待处理触发，返回处理数量
    ///
    /// 急停先进入状态机再下发固件，固件调用阻塞不会推迟状态切换。
    async fn drain_triggers(&self, transitions: &mut Vec<StateHistoryEntry>) -> usize {
        let mut count = 0;
        while let Ok(trigger) = self.registry.triggers().try_recv() {
            count += 1;
            debug!(trigger = trigger.name(), "Routing control trigger");

            match self.registry.state_machine().apply_trigger(&trigger) {
                Ok(Some(entry)) => transitions.push(entry),
                Ok(None) => {},
                Err(e) => warn!(trigger = trigger.name(), error = %e, "Trigger rejected by state machine"),
            }

            if let ControlTrigger::EmergencyStop { reason } = &trigger {
                let resp = self.registry.gateway().emergency_stop().await;
                if resp.success {
                    info!(%reason, "Emergency stop delivered to firmware");
                } else {
                    error!(%reason, error = ?resp.error, "Emergency stop not acknowledged by firmware");
                }
            }
        }
        count
    }

    /// 周期执行直到 `shutdown` 变为 `true` 或发送端被丢弃
    ///
    /// 周期之间到达的触发立即处理。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let wake = Arc::new(Notify::new());
        // 丢弃 `handled` 即让唤醒线程退出
        let (handled, handled_rx) = bounded(1);
        let waker = spawn_trigger_waker(self.registry.triggers().clone(), handled_rx, wake.clone());
        if let Err(e) = waker {
            warn!(error = %e, "Trigger waker unavailable, triggers handled on ticks only");
        }
        info!(interval_ms = self.interval.as_millis() as u64, "Supervisor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    let _ = handled.try_send(());
                    if !report.transitions.is_empty() {
                        debug!(
                            transitions = report.transitions.len(),
                            state = %self.registry.state_machine().current_state(),
                            "Supervisor tick changed state"
                        );
                    }
                },
                _ = wake.notified() => {
                    let transitions = self.route_triggers().await;
                    let _ = handled.try_send(());
                    if !transitions.is_empty() {
                        debug!(
                            transitions = transitions.len(),
                            state = %self.registry.state_machine().current_state(),
                            "Trigger changed state"
                        );
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                },
            }
        }
        info!("Supervisor stopped");
    }

    /// 在 tokio 运行时上启动监督循环
    pub fn spawn(self: Arc<Self>) -> SupervisorHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(rx).await });
        SupervisorHandle { shutdown, task }
    }
}

/// 触发到达时唤醒监督循环
///
/// 线程只等待通道就绪而不取走触发，触发仍由监督循环按到达顺序处理。
/// 每次唤醒后等待循环回报处理完成；`handled` 的发送端被丢弃时退出。
fn spawn_trigger_waker(
    triggers: Receiver<ControlTrigger>,
    handled: Receiver<()>,
    wake: Arc<Notify>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("oht-trigger-waker".into())
        .spawn(move || {
            loop {
                let mut select = Select::new();
                let arrived = select.recv(&triggers);
                select.recv(&handled);
                if select.ready() == arrived {
                    wake.notify_one();
                }
                if handled.recv().is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}

/// 运行中的监督循环
#[derive(Debug)]
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// 通知循环退出并等待其结束
    pub async fn stop(self) -> Result<(), ControlError> {
        // 循环已退出时接收端不存在，忽略发送失败
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|e| ControlError::Task(e.to_string()))
    }
}
