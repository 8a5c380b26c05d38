//! # OHT CLI
//!
//! Command-line interface for the OHT-50 control plane.
//!
//! ```bash
//! # 校验并查看配置
//! oht-cli config check control.toml
//! oht-cli config show control.toml
//!
//! # 单次健康探测（输出 JSON）
//! oht-cli health --firmware-url http://127.0.0.1:8081
//!
//! # 运行控制面直到 Ctrl-C
//! oht-cli run --config control.toml
//!
//! # 急停
//! oht-cli estop
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigCommand, EstopCommand, HealthCommand, RunCommand};

/// OHT CLI - 控制面命令行工具
#[derive(Parser, Debug)]
#[command(name = "oht-cli")]
#[command(about = "Command-line interface for the OHT-50 control plane", long_about = None)]
#[command(version)]
struct Cli {
    /// 输出调试日志（RUST_LOG 优先）
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行控制面（监督循环）直到 Ctrl-C
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 探测一次固件健康
    Health {
        #[command(flatten)]
        args: HealthCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 急停
    Estop {
        #[command(flatten)]
        args: EstopCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let directive = if cli.verbose {
        "oht=debug"
    } else {
        oht_control::logging::DEFAULT_DIRECTIVE
    };
    oht_control::logging::init(directive)?;

    match cli.command {
        Commands::Run { args } => args.execute().await,
        Commands::Health { args } => args.execute().await,
        Commands::Config(cmd) => cmd.execute(),
        Commands::Estop { args } => args.execute().await,
    }
}
