//! 连接会话
//!
//! 每个命令独立执行：
//! 1. 读取配置（命令行参数优先）
//! 2. 打开传输（模拟设备或宿主进程）
//! 3. 启动客户端并等待链路建立

use crate::config::CliConfig;
use anyhow::{Context, Result};
use clap::Args;
use robomaster_bridge::SimBridge;
use robomaster_sdk::prelude::*;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// 连接参数（所有子命令共享）
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// 使用进程内模拟设备
    #[arg(long, global = true)]
    pub sim: bool,

    /// 宿主进程命令行（覆盖配置）
    #[arg(long, global = true)]
    pub host_cmd: Option<String>,

    /// 机器人 IP（覆盖配置）
    #[arg(long, global = true)]
    pub robot_ip: Option<String>,
}

impl ConnectArgs {
    /// 合并命令行参数与配置文件得到客户端配置
    pub fn client_config(&self, config: &CliConfig) -> ClientConfig {
        let mut client = ClientConfig::default();
        if let Some(ip) = self.robot_ip.as_ref().or(config.robot_ip.as_ref()) {
            client.robot_ip = ip.clone();
        }
        if let Some(ms) = config.request_timeout_ms {
            client.request_timeout_ms = ms;
        }
        client
    }

    /// 打开传输
    pub fn open_bridge(&self, config: &CliConfig) -> Result<Arc<dyn Transport>> {
        if self.sim {
            println!("🧪 使用模拟设备");
            return Ok(Arc::new(SimBridge::new()?));
        }

        let command_line = self
            .host_cmd
            .as_ref()
            .or(config.host_command.as_ref())
            .context("未配置宿主命令，请使用 --host-cmd、--sim 或 `config set --host-cmd`")?;
        let mut command = host_command(command_line)?;
        let bridge = ProxyBridge::spawn(&mut command)
            .with_context(|| format!("启动宿主进程失败: {}", command_line))?;
        Ok(Arc::new(bridge))
    }

    /// 启动客户端并等待链路建立
    pub fn connect(&self) -> Result<Client> {
        let config = CliConfig::load()?;
        let bridge = self.open_bridge(&config)?;
        let client_config = self.client_config(&config);

        println!(
            "🔌 连接到机器人 {}:{}...",
            client_config.robot_ip, client_config.port
        );
        let client = Client::new(bridge, client_config)?;
        client.start().context("启动客户端失败")?;
        client.wait_for_link_default().context("等待链路建立失败")?;
        println!("✅ 已连接");
        Ok(client)
    }
}

/// 按空白拆分宿主命令行
fn host_command(command_line: &str) -> Result<Command> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next().context("宿主命令为空")?;
    let mut command = Command::new(program);
    command.args(parts);
    Ok(command)
}

/// 请求结果的最长等待时间
pub fn result_wait(client: &Client) -> Duration {
    client
        .controller()
        .config()
        .request_timeout
        .unwrap_or(Duration::from_secs(10))
        + Duration::from_millis(500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let config = CliConfig {
            robot_ip: Some("10.0.0.1".to_string()),
            request_timeout_ms: Some(250),
            ..CliConfig::default()
        };
        let args = ConnectArgs {
            robot_ip: Some("10.0.0.9".to_string()),
            ..ConnectArgs::default()
        };

        let client = args.client_config(&config);
        assert_eq!(client.robot_ip, "10.0.0.9");
        assert_eq!(client.request_timeout_ms, 250);

        let client = ConnectArgs::default().client_config(&config);
        assert_eq!(client.robot_ip, "10.0.0.1");
    }

    #[test]
    fn test_host_command_split() {
        let command = host_command("unity-bridge-host --verbose  --port 1").unwrap();
        assert_eq!(command.get_program(), "unity-bridge-host");
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["--verbose", "--port", "1"]);

        assert!(host_command("   ").is_err());
    }

    #[test]
    fn test_missing_host_command() {
        let err = ConnectArgs::default()
            .open_bridge(&CliConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("--host-cmd"));
    }
}
