//! 客户端错误类型

use robomaster_bridge::BridgeError;
use robomaster_driver::DriverError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// 传输层错误（启动阶段视为致命）
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 引擎初始化返回 false
    #[error("Unable to initialize the Unity bridge")]
    InitializeFailed,

    /// 等待链路建立超时
    #[error("Link not established within {timeout:?}")]
    LinkTimeout { timeout: Duration },

    /// 客户端尚未启动或已停止
    #[error("Client is not running")]
    NotRunning,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// 是否为传输层故障
    pub fn is_transport_fault(&self) -> bool {
        match self {
            ClientError::Bridge(_) | ClientError::InitializeFailed => true,
            ClientError::Driver(e) => e.is_transport_fault(),
            _ => false,
        }
    }
}
