//! 单次命令：读取、写入、动作与安全密钥

use super::{await_result, lookup_key, parse_value, print_result};
use crate::session::{ConnectArgs, result_wait};
use anyhow::{Context, Result};
use clap::Args;
use crossbeam_channel::bounded;
use robomaster_sdk::prelude::*;

/// 读取 Key 的当前值
#[derive(Args, Debug)]
pub struct GetCommand {
    /// Key 名称（如 AirLinkConnection）
    pub key: String,

    /// 读取引擎缓存值（GetAvailableValue）
    #[arg(long)]
    pub cached: bool,
}

impl GetCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let key = lookup_key(&self.key)?;
        let client = connect.connect()?;
        let controller = client.controller();

        let result = if self.cached {
            controller
                .get_available_value(key)
                .with_context(|| format!("读取缓存值失败: {}", key.name()))?
        } else {
            let (tx, rx) = bounded(1);
            controller.get_value(key, move |result| {
                let _ = tx.send(result);
            })?;
            await_result(&rx, result_wait(&client))?
        };

        print_result(&result)
    }
}

/// 写入 Key 的值
#[derive(Args, Debug)]
pub struct SetCommand {
    /// Key 名称
    pub key: String,

    /// 值（JSON 或纯字符串）
    pub value: String,
}

impl SetCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let key = lookup_key(&self.key)?;
        let value = parse_value(&self.value);
        let client = connect.connect()?;

        let (tx, rx) = bounded(1);
        client.controller().set_value(
            key,
            &value,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        )?;

        let result = await_result(&rx, result_wait(&client))?;
        print_result(&result)?;
        println!("✅ {} 已写入", key.name());
        Ok(())
    }
}

/// 触发动作
#[derive(Args, Debug)]
pub struct ActionCommand {
    /// Key 名称
    pub key: String,

    /// 动作参数（JSON 或纯字符串）
    pub value: Option<String>,
}

impl ActionCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let key = lookup_key(&self.key)?;
        let param = self.value.as_deref().map(parse_value);
        let client = connect.connect()?;

        let (tx, rx) = bounded(1);
        client.controller().perform_action(
            key,
            param,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        )?;

        let result = await_result(&rx, result_wait(&client))?;
        print_result(&result)?;
        println!("✅ {} 已执行", key.name());
        Ok(())
    }
}

/// 查询安全密钥
#[derive(Args, Debug)]
pub struct SecurityKeyCommand {
    /// 密钥链索引
    pub index: u64,
}

impl SecurityKeyCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let client = connect.connect()?;
        let key = client
            .controller()
            .security_key(self.index)
            .with_context(|| format!("查询安全密钥失败: index {}", self.index))?;
        println!("{}", key);
        Ok(())
    }
}
