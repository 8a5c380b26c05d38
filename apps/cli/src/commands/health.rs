//! 单次健康探测

use anyhow::{Result, bail};
use clap::Args;

use super::FirmwareArgs;

#[derive(Args, Debug)]
pub struct HealthCommand {
    #[command(flatten)]
    pub firmware: FirmwareArgs,
}

impl HealthCommand {
    /// 探测一次并输出网关健康快照（JSON）；固件不健康时返回错误
    pub async fn execute(&self) -> Result<()> {
        let registry = self.firmware.registry()?;
        let gateway = registry.gateway();

        let check = gateway.check_health().await;
        println!("{}", serde_json::to_string_pretty(&gateway.health_snapshot())?);

        if !check.healthy {
            bail!(
                "firmware unhealthy: {}",
                check.error.as_deref().unwrap_or("no error detail")
            );
        }
        Ok(())
    }
}
