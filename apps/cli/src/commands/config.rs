//! 配置管理命令

use anyhow::{Context, Result};
use clap::Subcommand;
use oht_control::ControlConfig;
use std::path::{Path, PathBuf};

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 校验配置文件
    Check {
        /// 配置文件路径
        file: PathBuf,
    },

    /// 打印生效配置（未给出文件时打印默认值）
    Show {
        /// 配置文件路径
        file: Option<PathBuf>,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Check { file } => {
                let config = Self::check_(&file)?;
                println!("✅ 配置有效: {}", file.display());
                println!("  固件: {}", config.firmware.base_url);
                println!("  安全区: {}", config.safety_zones.len());
                Ok(())
            },
            ConfigCommand::Show { file } => {
                print!("{}", Self::show_(file.as_deref())?);
                Ok(())
            },
        }
    }

    fn check_(file: &Path) -> Result<ControlConfig> {
        ControlConfig::load(file).with_context(|| format!("配置无效: {}", file.display()))
    }

    fn show_(file: Option<&Path>) -> Result<String> {
        let config = match file {
            Some(path) => Self::check_(path)?,
            None => ControlConfig::default(),
        };
        Ok(config.to_toml_string()?)
    }
}
