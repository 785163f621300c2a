//! 客户端接口模块
//!
//! 在命令分发器之上提供：
//! - 连接引导（`Client::start` / `Client::wait_for_link`）
//! - 底盘虚拟摇杆（`Chassis`）
//! - 云台动作（`Gimbal`）
//! - TOML 配置（`ClientConfig`）
//!
//! 需要直接收发 Key 命令时，使用 [`Client::controller`] 取得底层分发器。

pub mod chassis;
pub mod client;
pub mod config;
pub mod error;
pub mod gimbal;

pub use chassis::Chassis;
pub use client::{Client, LINK_LISTENER_ID};
pub use config::ClientConfig;
pub use error::ClientError;
pub use gimbal::Gimbal;
