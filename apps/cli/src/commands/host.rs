//! 宿主模式：在 stdin/stdout 上提供代理协议服务
//!
//! 供 `--host-cmd "robomaster-cli host"` 之类的调用方连接。
//! 后端为模拟设备；日志只写 stderr，stdout 专用于协议帧。

use anyhow::{Context, Result};
use clap::Args;
use robomaster_bridge::{SimBridge, host};
use std::io;
use std::sync::Arc;
use tracing::info;

/// 宿主命令参数
#[derive(Args, Debug)]
pub struct HostCommand {}

impl HostCommand {
    pub fn execute(&self) -> Result<()> {
        let sim = Arc::new(SimBridge::new().context("创建模拟设备失败")?);
        info!("Serving simulated bridge on stdio");
        host::serve(io::stdin().lock(), io::stdout(), sim).context("宿主循环异常退出")?;
        Ok(())
    }
}
