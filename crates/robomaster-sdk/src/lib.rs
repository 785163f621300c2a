//! RoboMaster SDK - 通过 Unity Bridge 控制 DJI RoboMaster 机器人
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 事件码、标签、Key 目录、结果信封
//! - **传输层** (`bridge`): 引擎传输接口、进程外代理、模拟设备
//! - **驱动层** (`driver`): 命令/事件关联、分发线程、监听扇出
//! - **客户端层** (`client`): 连接引导、底盘、云台
//!
//! # 快速开始
//!
//! ```no_run
//! use robomaster_sdk::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), ClientError> {
//! robomaster_sdk::init_logger();
//!
//! let bridge = Arc::new(ProxyBridge::spawn(&mut std::process::Command::new("unity-bridge-host"))?);
//! let client = Client::new(bridge, ClientConfig::default())?;
//! client.start()?;
//! client.wait_for_link(Duration::from_secs(5))?;
//!
//! client.controller().get_value(keys::AIR_LINK_CONNECTION, |result| {
//!     println!("link: {:?}", result.value_bool());
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod prelude;

pub use robomaster_bridge as bridge;
pub use robomaster_client as client;
pub use robomaster_driver as driver;
pub use robomaster_protocol as protocol;

// 协议层
pub use protocol::{EventCode, EventType, Key, KeyRegistry, KeyResult, ProtocolError};

// 传输层
pub use bridge::{BridgeError, ProxyBridge, Transport};

// 驱动层（高级用户使用）
pub use driver::{CommandController, ControllerBuilder, ControllerConfig, DriverError};

// 客户端层（推荐入口）
pub use client::{Chassis, Client, ClientConfig, ClientError, Gimbal};

pub use logging::{init_logger, init_logger_with_filter};
