//! 持续监听 Key 的推送

use super::lookup_key;
use crate::session::ConnectArgs;
use anyhow::{Context, Result};
use clap::Args;
use crossbeam_channel::{RecvTimeoutError, unbounded};
use robomaster_sdk::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const LISTENER_ID: &str = "robomaster-cli";

/// 监听命令参数
#[derive(Args, Debug)]
pub struct ListenCommand {
    /// Key 名称
    pub key: String,

    /// 监听时长（秒），0 表示直到 Ctrl+C
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,

    /// 订阅前先读取缓存值
    #[arg(long)]
    pub cached: bool,
}

impl ListenCommand {
    pub fn execute(&self, connect: &ConnectArgs) -> Result<()> {
        let key = lookup_key(&self.key)?;
        let client = connect.connect()?;
        let controller = client.controller();

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        ctrlc::set_handler(move || running_clone.store(false, Ordering::SeqCst))
            .context("设置 Ctrl+C 处理失败")?;

        let (tx, rx) = unbounded();
        controller.start_listening(
            key,
            LISTENER_ID,
            move |result: &KeyResult| {
                let _ = tx.send(result.clone());
            },
            self.cached,
        )?;

        println!("👂 监听 {}，按 Ctrl+C 停止\n", key.name());
        let deadline = (self.duration > 0)
            .then(|| Instant::now() + Duration::from_secs(self.duration));
        let mut count = 0u64;

        while running.load(Ordering::SeqCst) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                println!("\n⏱️  达到时长限制");
                break;
            }
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(result) => {
                    count += 1;
                    if result.succeeded() {
                        println!("[{}] {}", count, result.value);
                    } else {
                        println!(
                            "[{}] ❌ code {}: {}",
                            count, result.error_code, result.error_description
                        );
                    }
                },
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        controller.stop_listening(key, LISTENER_ID)?;
        println!("✅ 监听已结束，共收到 {} 条推送", count);
        Ok(())
    }
}
