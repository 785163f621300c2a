//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use robomaster_sdk::prelude::*;
//! ```

// 客户端层（推荐使用）
pub use crate::client::{Chassis, Client, ClientConfig, Gimbal};

// 驱动层
pub use crate::driver::{CommandController, ControllerBuilder, ListenerId, ResultCallback};

// 协议层
pub use crate::protocol::keys;
pub use crate::protocol::{
    EventType, FunctionEnable, GimbalAngleRotation, Key, KeyResult, VirtualStick,
};

// 传输层
pub use crate::bridge::{ProxyBridge, Transport};

// 错误类型
pub use crate::bridge::BridgeError;
pub use crate::client::ClientError;
pub use crate::driver::DriverError;
pub use crate::protocol::ProtocolError;
