//! 急停命令
//!
//! 直接下发固件急停（跳过熔断门控），打印固件应答。

use anyhow::{Result, bail};
use clap::Args;

use super::FirmwareArgs;

/// 急停命令参数
#[derive(Args, Debug)]
pub struct EstopCommand {
    #[command(flatten)]
    pub firmware: FirmwareArgs,
}

impl EstopCommand {
    pub async fn execute(&self) -> Result<()> {
        let registry = self.firmware.registry()?;

        println!("🛑 发送急停命令...");
        let resp = registry.gateway().emergency_stop().await;
        println!("{}", serde_json::to_string_pretty(&resp)?);

        if let Some(e) = &resp.error {
            bail!("emergency stop not acknowledged: {e}");
        }
        println!("✅ 急停完成");
        Ok(())
    }
}
