//! # RoboMaster Bridge Layer
//!
//! Unity Bridge 传输抽象层：把"发送事件"和"按事件类型注册入站回调"
//! 统一成 [`Transport`] trait。
//!
//! ## 实现
//!
//! - [`ProxyBridge`]: 通过字节流与独立的宿主进程通信（原生引擎运行在宿主进程中）
//! - [`host::serve`]: 宿主侧的请求处理循环
//! - `MockBridge` / `SimBridge`（`mock` feature）：测试与无设备演示
//!
//! ## 线程模型
//!
//! 入站回调在传输层自己的线程上调用，调用方必须尽快返回，
//! 不得在回调中阻塞等待同一传输的其它响应。

use std::sync::Arc;
use thiserror::Error;

pub mod frame;
pub mod host;
pub mod proxy;
mod sinks;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub mod sim;

pub use frame::{Frame, Function, Response};
pub use proxy::ProxyBridge;
pub use sinks::SinkTable;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockBridge, SentEvent, SentPayload};

#[cfg(any(test, feature = "mock"))]
pub use sim::SimBridge;

/// 入站事件回调：`(事件码, 负载, 标签)`
pub type EventSink = Arc<dyn Fn(u64, &[u8], u64) + Send + Sync>;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] BridgeDeviceError),
    #[error("Unexpected function in response: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedFunction { expected: u8, actual: u8 },
    #[error("Unknown function id: 0x{0:02X}")]
    UnknownFunction(u8),
    #[error("Frame payload too large: {len} bytes (max 65535)")]
    FrameTooLarge { len: usize },
    #[error("Truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("Bridge not initialized")]
    NotInitialized,
    #[error("Bridge closed")]
    Closed,
    #[error("Response timeout")]
    Timeout,
}

/// 宿主/引擎错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDeviceErrorKind {
    Unknown,
    /// 宿主进程无法启动
    SpawnFailed,
    /// 宿主进程已退出
    HostExited,
    /// 引擎初始化失败
    InitializeFailed,
    InvalidResponse,
    Backend,
}

/// 结构化宿主错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct BridgeDeviceError {
    pub kind: BridgeDeviceErrorKind,
    pub message: String,
}

impl BridgeDeviceError {
    pub fn new(kind: BridgeDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            BridgeDeviceErrorKind::SpawnFailed | BridgeDeviceErrorKind::HostExited
        )
    }
}

impl From<String> for BridgeDeviceError {
    fn from(message: String) -> Self {
        Self::new(BridgeDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for BridgeDeviceError {
    fn from(message: &str) -> Self {
        Self::new(BridgeDeviceErrorKind::Unknown, message)
    }
}

/// Unity Bridge 传输接口
///
/// 所有方法都可以从任意线程调用。入站回调按事件类型注册：
/// `event_code` 取 `类型 << 32`（子类型为 0），传输层把该类型的
/// 所有入站事件交给对应回调。
pub trait Transport: Send + Sync {
    /// 创建引擎实例
    fn create(&self, name: &str, debuggable: bool, log_path: &str) -> Result<(), BridgeError>;

    /// 销毁引擎实例
    fn destroy(&self) -> Result<(), BridgeError>;

    /// 初始化引擎，返回引擎是否就绪
    fn initialize(&self) -> Result<bool, BridgeError>;

    fn uninitialize(&self) -> Result<(), BridgeError>;

    /// 发送字节负载事件
    fn send_event(&self, event_code: u64, data: &[u8], tag: u64) -> Result<(), BridgeError>;

    /// 发送字符串负载事件
    fn send_event_with_string(&self, event_code: u64, data: &str, tag: u64)
    -> Result<(), BridgeError>;

    /// 发送数值负载事件
    fn send_event_with_number(&self, event_code: u64, data: u64, tag: u64)
    -> Result<(), BridgeError>;

    /// 注册（`Some`）或注销（`None`）某事件类型的入站回调
    fn set_event_callback(
        &self,
        event_code: u64,
        sink: Option<EventSink>,
    ) -> Result<(), BridgeError>;

    /// 查询安全密钥
    fn get_security_key_by_keychain_index(&self, index: u64) -> Result<String, BridgeError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn create(&self, name: &str, debuggable: bool, log_path: &str) -> Result<(), BridgeError> {
        (**self).create(name, debuggable, log_path)
    }

    fn destroy(&self) -> Result<(), BridgeError> {
        (**self).destroy()
    }

    fn initialize(&self) -> Result<bool, BridgeError> {
        (**self).initialize()
    }

    fn uninitialize(&self) -> Result<(), BridgeError> {
        (**self).uninitialize()
    }

    fn send_event(&self, event_code: u64, data: &[u8], tag: u64) -> Result<(), BridgeError> {
        (**self).send_event(event_code, data, tag)
    }

    fn send_event_with_string(
        &self,
        event_code: u64,
        data: &str,
        tag: u64,
    ) -> Result<(), BridgeError> {
        (**self).send_event_with_string(event_code, data, tag)
    }

    fn send_event_with_number(
        &self,
        event_code: u64,
        data: u64,
        tag: u64,
    ) -> Result<(), BridgeError> {
        (**self).send_event_with_number(event_code, data, tag)
    }

    fn set_event_callback(
        &self,
        event_code: u64,
        sink: Option<EventSink>,
    ) -> Result<(), BridgeError> {
        (**self).set_event_callback(event_code, sink)
    }

    fn get_security_key_by_keychain_index(&self, index: u64) -> Result<String, BridgeError> {
        (**self).get_security_key_by_keychain_index(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_display() {
        let err = BridgeError::FrameTooLarge { len: 70000 };
        assert_eq!(
            format!("{}", err),
            "Frame payload too large: 70000 bytes (max 65535)"
        );

        let err = BridgeError::UnexpectedFunction {
            expected: 0x04,
            actual: 0x06,
        };
        assert!(format!("{}", err).contains("expected 0x04, got 0x06"));

        let err: BridgeError =
            BridgeDeviceError::new(BridgeDeviceErrorKind::HostExited, "eof").into();
        assert_eq!(format!("{}", err), "Device Error: HostExited: eof");
    }

    #[test]
    fn test_device_error_is_fatal() {
        assert!(BridgeDeviceError::new(BridgeDeviceErrorKind::SpawnFailed, "x").is_fatal());
        assert!(!BridgeDeviceError::new(BridgeDeviceErrorKind::InvalidResponse, "x").is_fatal());
        assert!(!BridgeDeviceError::from("plain").is_fatal());
    }
}
