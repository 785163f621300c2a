//! Key 目录列表（不需要连接）

use anyhow::Result;
use clap::Args;
use robomaster_sdk::prelude::*;
use robomaster_sdk::protocol::KeyRegistry;

/// 列出内置 Key
#[derive(Args, Debug)]
pub struct KeysCommand {
    /// 只显示名称包含该字符串的 Key（大小写不敏感）
    #[arg(short, long)]
    pub filter: Option<String>,
}

impl KeysCommand {
    pub fn execute(&self) -> Result<()> {
        let keys = self.matching();
        println!("{:<40} {:>10}  {:<7} {}", "NAME", "WIRE ID", "SHAPE", "ACCESS");
        for key in &keys {
            println!(
                "{:<40} {:>10}  {:<7} {}",
                key.name(),
                key.wire_id(),
                format!("{:?}", key.shape()),
                key.access()
            );
        }
        println!("\n📋 共 {} 个 Key", keys.len());
        Ok(())
    }

    fn matching(&self) -> Vec<Key> {
        let filter = self.filter.as_deref().map(str::to_ascii_lowercase);
        KeyRegistry::builtin()
            .iter()
            .filter(|key| match &filter {
                Some(f) => key.name().to_ascii_lowercase().contains(f),
                None => true,
            })
            .collect()
    }
}
