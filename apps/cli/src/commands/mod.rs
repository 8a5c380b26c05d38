//! CLI 命令模块

pub mod config;
pub mod estop;
pub mod health;
pub mod run;

pub use config::ConfigCommand;
pub use estop::EstopCommand;
pub use health::HealthCommand;
pub use run::RunCommand;

use anyhow::{Context, Result};
use clap::Args;
use oht_control::{ControlConfig, ServiceRegistry};
use oht_tools::SystemClock;
use oht_transport::MockTransport;
use std::path::PathBuf;
use std::sync::Arc;

/// 连接固件所需的公共参数
#[derive(Args, Debug, Clone, Default)]
pub struct FirmwareArgs {
    /// 配置文件（TOML，缺省使用内置默认值）
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 固件地址（覆盖 [firmware].base_url）
    #[arg(long, value_name = "URL")]
    pub firmware_url: Option<String>,

    /// 使用内存中的模拟固件
    #[arg(long)]
    pub mock: bool,
}

impl FirmwareArgs {
    /// 加载配置并应用命令行覆盖
    pub fn load_config(&self) -> Result<ControlConfig> {
        let mut config = match &self.config {
            Some(path) => ControlConfig::load(path)
                .with_context(|| format!("加载配置失败: {}", path.display()))?,
            None => ControlConfig::default(),
        };
        if let Some(url) = &self.firmware_url {
            config.firmware.base_url = url.clone();
            config.validate().context("固件地址无效")?;
        }
        Ok(config)
    }

    /// 构造控制面服务
    pub fn registry(&self) -> Result<Arc<ServiceRegistry>> {
        let config = self.load_config()?;
        let registry = if self.mock {
            ServiceRegistry::init(config, Arc::new(MockTransport::new()), Arc::new(SystemClock))?
        } else {
            ServiceRegistry::connect(config)?
        };
        Ok(Arc::new(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_url_override_applied() {
        let args = FirmwareArgs {
            firmware_url: Some("http://10.1.2.3:8081".to_string()),
            ..FirmwareArgs::default()
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.firmware.base_url, "http://10.1.2.3:8081");
    }

    #[test]
    fn test_invalid_url_override_rejected() {
        let args = FirmwareArgs {
            firmware_url: Some("10.1.2.3:8081".to_string()),
            ..FirmwareArgs::default()
        };
        assert!(args.load_config().is_err());
    }

    #[test]
    fn test_config_file_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[firmware]\nrobot_id = \"OHT-50-042\"").unwrap();
        let args = FirmwareArgs {
            config: Some(file.path().to_path_buf()),
            ..FirmwareArgs::default()
        };
        assert_eq!(args.load_config().unwrap().firmware.robot_id, "OHT-50-042");
    }
}
