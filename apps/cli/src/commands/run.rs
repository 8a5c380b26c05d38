//! 运行控制面
//!
//! 启动监督循环，直到收到 Ctrl-C 后依次停止监督器、关闭服务。

use anyhow::{Context, Result};
use clap::Args;
use oht_control::Supervisor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

use super::FirmwareArgs;

/// 运行参数
#[derive(Args, Debug)]
pub struct RunCommand {
    #[command(flatten)]
    pub firmware: FirmwareArgs,

    /// 健康探测周期（毫秒，覆盖 [health].check_interval_ms）
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,
}

impl RunCommand {
    pub async fn execute(&self) -> Result<()> {
        let registry = self.firmware.registry()?;

        let mut supervisor = Supervisor::new(registry.clone());
        if let Some(ms) = self.interval_ms.filter(|ms| *ms > 0) {
            supervisor = supervisor.with_interval(Duration::from_millis(ms));
        }

        let stop = Arc::new(Notify::new());
        let notifier = stop.clone();
        ctrlc::set_handler(move || notifier.notify_one()).context("设置 Ctrl-C 处理失败")?;

        println!(
            "🚀 控制面已启动（固件: {}），按 Ctrl-C 退出",
            registry.config().firmware.base_url
        );
        let handle = Arc::new(supervisor).spawn();

        stop.notified().await;
        info!("Interrupt received, shutting down");

        handle.stop().await?;
        if let Some(entry) = registry.shutdown()? {
            info!(from = %entry.from, "Control plane reached shutdown");
        }

        let status = registry.state_machine().system_status();
        println!("{}", serde_json::to_string_pretty(&status)?);
        println!("✅ 已退出");
        Ok(())
    }
}
