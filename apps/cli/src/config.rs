//! 配置管理命令
//!
//! CLI 配置保存在 `~/.config/robomaster/config.toml`：
//!
//! ```toml
//! host_command = "unity-bridge-host --port 10607"
//! robot_ip = "192.168.2.1"
//! request_timeout_ms = 10000
//! ```

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置目录
fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("无法确定配置目录")?;
    path.push("robomaster");
    Ok(path)
}

/// 配置文件路径
pub fn config_file() -> Result<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 宿主进程命令行（空白分隔）
    pub host_command: Option<String>,

    /// 机器人 IP
    pub robot_ip: Option<String>,

    /// 单次请求超时（毫秒）
    pub request_timeout_ms: Option<u64>,
}

impl CliConfig {
    /// 加载默认位置的配置（文件不存在时返回默认配置）
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 保存到默认位置
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content).context("写入配置文件失败")?;
        Ok(())
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 宿主进程命令行
        #[arg(long)]
        host_cmd: Option<String>,

        /// 机器人 IP
        #[arg(long)]
        robot_ip: Option<String>,

        /// 单次请求超时（毫秒）
        #[arg(long)]
        request_timeout_ms: Option<u64>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称
        #[arg(default_value = "all")]
        key: String,
    },

    /// 显示配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Set {
                host_cmd,
                robot_ip,
                request_timeout_ms,
            } => {
                let mut config = CliConfig::load()?;
                apply(&mut config, host_cmd, robot_ip, request_timeout_ms);
                config.save()?;
                println!("✅ 配置已保存: {}", config_file()?.display());
                Ok(())
            },

            ConfigCommand::Get { key } => {
                let config = CliConfig::load()?;
                println!("{}", describe(&config, &key)?);
                Ok(())
            },

            ConfigCommand::Path => {
                println!("{}", config_file()?.display());
                Ok(())
            },
        }
    }
}

fn apply(
    config: &mut CliConfig,
    host_cmd: Option<String>,
    robot_ip: Option<String>,
    request_timeout_ms: Option<u64>,
) {
    if let Some(cmd) = host_cmd {
        println!("✅ 设置宿主命令: {}", cmd);
        config.host_command = Some(cmd);
    }
    if let Some(ip) = robot_ip {
        println!("✅ 设置机器人 IP: {}", ip);
        config.robot_ip = Some(ip);
    }
    if let Some(ms) = request_timeout_ms {
        println!("✅ 设置请求超时: {} ms", ms);
        config.request_timeout_ms = Some(ms);
    }
}

fn describe(config: &CliConfig, key: &str) -> Result<String> {
    let show = |value: Option<String>| value.unwrap_or_else(|| "(未设置)".to_string());
    match key {
        "host_command" | "host-cmd" => Ok(show(config.host_command.clone())),
        "robot_ip" | "robot-ip" => Ok(show(config.robot_ip.clone())),
        "request_timeout_ms" | "request-timeout-ms" => {
            Ok(show(config.request_timeout_ms.map(|ms| ms.to_string())))
        },
        "all" => toml::to_string_pretty(config).context("序列化配置失败"),
        other => anyhow::bail!("未知配置项: {}", other),
    }
}
