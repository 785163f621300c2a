//! 驱动层错误类型定义

use robomaster_bridge::BridgeError;
use robomaster_protocol::{AccessType, ProtocolError};
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// 协议编码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key 不具备所需权限（未发送任何事件）
    #[error("Access denied: {key} does not allow {required}")]
    AccessDenied {
        key: &'static str,
        required: AccessType,
    },

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 入站队列已关闭（分发线程退出）
    #[error("Inbound channel closed")]
    ChannelClosed,

    /// 控制器已拆除
    #[error("Command controller torn down")]
    TornDown,

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DriverError {
    /// 是否为传输层故障
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, DriverError::Bridge(_))
    }
}

#[cfg(test)]
mod tests {
    use super::DriverError;
    use robomaster_bridge::BridgeError;
    use robomaster_protocol::{AccessType, ProtocolError};

    /// 测试 DriverError 的 Display 实现
    #[test]
    fn test_driver_error_display() {
        let driver_error = DriverError::Bridge(BridgeError::Closed);
        let msg = format!("{}", driver_error);
        assert_eq!(msg, "Bridge error: Bridge closed");

        let driver_error = DriverError::Protocol(ProtocolError::UnknownKey("X".to_string()));
        let msg = format!("{}", driver_error);
        assert!(msg.contains("Unknown key: X"), "Protocol error message: {}", msg);

        let driver_error = DriverError::AccessDenied {
            key: "AirLinkConnection",
            required: AccessType::WRITE,
        };
        assert_eq!(
            format!("{}", driver_error),
            "Access denied: AirLinkConnection does not allow Write"
        );

        assert_eq!(format!("{}", DriverError::Timeout), "Operation timeout");
        assert_eq!(
            format!("{}", DriverError::TornDown),
            "Command controller torn down"
        );

        let driver_error = DriverError::InvalidInput("zero capacity".to_string());
        let msg = format!("{}", driver_error);
        assert!(msg.contains("Invalid input") && msg.contains("zero capacity"));
    }

    /// 测试 From 转换
    #[test]
    fn test_from_conversions() {
        let driver_error: DriverError = BridgeError::NotInitialized.into();
        assert!(driver_error.is_transport_fault());

        let driver_error: DriverError = ProtocolError::SequenceOutOfRange { sequence: 1 }.into();
        assert!(matches!(driver_error, DriverError::Protocol(_)));
        assert!(!driver_error.is_transport_fault());
    }
}
