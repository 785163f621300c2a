//! 命令定义和实现

pub mod host;
pub mod keys;
pub mod listen;
pub mod value;

pub use host::HostCommand;
pub use keys::KeysCommand;
pub use listen::ListenCommand;
pub use value::{ActionCommand, GetCommand, SecurityKeyCommand, SetCommand};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use robomaster_sdk::prelude::*;
use robomaster_sdk::protocol::KeyRegistry;
use serde_json::Value;
use std::time::Duration;

/// 按名称查找 Key（大小写不敏感）
pub fn lookup_key(name: &str) -> Result<Key> {
    let registry = KeyRegistry::builtin();
    if let Ok(key) = registry.by_name(name) {
        return Ok(key);
    }
    registry
        .iter()
        .find(|key| key.name().eq_ignore_ascii_case(name))
        .with_context(|| format!("未知 Key: {}（使用 `keys` 查看列表）", name))
}

/// 解析命令行参数值：合法 JSON 按 JSON 解析，否则视为字符串
pub fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// 等待单次回调结果
pub fn await_result(rx: &Receiver<KeyResult>, wait: Duration) -> Result<KeyResult> {
    rx.recv_timeout(wait).context("等待结果超时")
}

/// 打印结果，失败时返回错误
pub fn print_result(result: &KeyResult) -> Result<()> {
    if !result.succeeded() {
        anyhow::bail!(
            "请求失败 (code {}): {}",
            result.error_code,
            result.error_description
        );
    }
    println!("{}", result.value);
    Ok(())
}
