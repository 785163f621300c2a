//! # RoboMaster CLI
//!
//! Command-line interface for DJI RoboMaster robots over the Unity bridge.
//!
//! ## One-shot 模式
//!
//! 每个命令独立执行（内部：连接 -> 执行 -> 断开）：
//!
//! ```bash
//! # 配置宿主进程
//! robomaster-cli config set --host-cmd "unity-bridge-host"
//!
//! # 读取、写入、动作
//! robomaster-cli get AirLinkConnection
//! robomaster-cli set GimbalWorkMode 2
//! robomaster-cli action GimbalResetPosition
//!
//! # 持续监听
//! robomaster-cli listen AirLinkSignalQuality --duration 10
//!
//! # 无设备演示
//! robomaster-cli --sim get AirLinkConnection
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod session;

use commands::{
    ActionCommand, GetCommand, HostCommand, KeysCommand, ListenCommand, SecurityKeyCommand,
    SetCommand,
};
use config::ConfigCommand;
use session::ConnectArgs;

/// RoboMaster CLI - 机器人命令行工具
#[derive(Parser, Debug)]
#[command(name = "robomaster-cli")]
#[command(about = "Command-line interface for DJI RoboMaster robots", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 列出内置 Key
    Keys {
        #[command(flatten)]
        args: KeysCommand,
    },

    /// 读取 Key 的值
    Get {
        #[command(flatten)]
        args: GetCommand,
    },

    /// 写入 Key 的值
    Set {
        #[command(flatten)]
        args: SetCommand,
    },

    /// 触发动作
    Action {
        #[command(flatten)]
        args: ActionCommand,
    },

    /// 持续监听 Key
    Listen {
        #[command(flatten)]
        args: ListenCommand,
    },

    /// 查询安全密钥
    SecurityKey {
        #[command(flatten)]
        args: SecurityKeyCommand,
    },

    /// 宿主模式（在 stdio 上服务模拟设备）
    Host {
        #[command(flatten)]
        args: HostCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志（stdout 在宿主模式下承载协议帧，日志写 stderr）
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("robomaster_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Keys { args } => args.execute(),
        Commands::Get { args } => args.execute(&cli.connect),
        Commands::Set { args } => args.execute(&cli.connect),
        Commands::Action { args } => args.execute(&cli.connect),
        Commands::Listen { args } => args.execute(&cli.connect),
        Commands::SecurityKey { args } => args.execute(&cli.connect),
        Commands::Host { args } => args.execute(),
    }
}
