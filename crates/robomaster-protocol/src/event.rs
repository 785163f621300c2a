//! 事件类型与事件码
//!
//! 事件码是一个 64 位整数：高 32 位为事件类型，低 32 位为子类型。
//! 对于 Key 相关的命令，子类型就是 Key 的线上 ID（wire id）。

use crate::ProtocolError;
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

// ============================================================================
// 事件类型
// ============================================================================

/// Unity Bridge 事件类型（封闭枚举）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u32)]
pub enum EventType {
    SetValue = 0,
    GetValue = 1,
    GetAvailableValue = 2,
    PerformAction = 3,
    StartListening = 4,
    StopListening = 5,
    Activation = 6,
    LocalAlbum = 7,
    FirmwareUpgrade = 8,
    Connection = 100,
    Security = 101,
    PrintLog = 200,
    StartVideo = 300,
    StopVideo = 301,
    Render = 302,
    GetNativeTexture = 303,
    VideoTransferSpeed = 304,
    AudioDataRecv = 305,
    VideoDataRecv = 306,
    NativeFunctions = 500,
}

impl EventType {
    /// 全部已知事件类型（按数值升序）
    pub const ALL: [EventType; 20] = [
        EventType::SetValue,
        EventType::GetValue,
        EventType::GetAvailableValue,
        EventType::PerformAction,
        EventType::StartListening,
        EventType::StopListening,
        EventType::Activation,
        EventType::LocalAlbum,
        EventType::FirmwareUpgrade,
        EventType::Connection,
        EventType::Security,
        EventType::PrintLog,
        EventType::StartVideo,
        EventType::StopVideo,
        EventType::Render,
        EventType::GetNativeTexture,
        EventType::VideoTransferSpeed,
        EventType::AudioDataRecv,
        EventType::VideoDataRecv,
        EventType::NativeFunctions,
    ];

    /// 事件类型名称
    pub fn name(self) -> &'static str {
        match self {
            EventType::SetValue => "SetValue",
            EventType::GetValue => "GetValue",
            EventType::GetAvailableValue => "GetAvailableValue",
            EventType::PerformAction => "PerformAction",
            EventType::StartListening => "StartListening",
            EventType::StopListening => "StopListening",
            EventType::Activation => "Activation",
            EventType::LocalAlbum => "LocalAlbum",
            EventType::FirmwareUpgrade => "FirmwareUpgrade",
            EventType::Connection => "Connection",
            EventType::Security => "Security",
            EventType::PrintLog => "PrintLog",
            EventType::StartVideo => "StartVideo",
            EventType::StopVideo => "StopVideo",
            EventType::Render => "Render",
            EventType::GetNativeTexture => "GetNativeTexture",
            EventType::VideoTransferSpeed => "VideoTransferSpeed",
            EventType::AudioDataRecv => "AudioDataRecv",
            EventType::VideoDataRecv => "VideoDataRecv",
            EventType::NativeFunctions => "NativeFunctions",
        }
    }

    /// 按名称查找事件类型（区分大小写）
    pub fn from_name(name: &str) -> Option<EventType> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// 该类型携带 Key 结果信封（由命令控制器处理）
    pub fn is_key_command(self) -> bool {
        matches!(
            self,
            EventType::SetValue
                | EventType::GetValue
                | EventType::GetAvailableValue
                | EventType::PerformAction
                | EventType::StartListening
        )
    }

    /// 以该类型为高 32 位、子类型为 0 的事件码
    ///
    /// 传输层按此值注册入站回调。
    pub fn base_code(self) -> u64 {
        EventCode::new(self, 0).code()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection 事件的子类型
pub mod connection {
    /// 发起连接
    pub const CONNECT: u32 = 0;
    /// 断开并重置连接参数
    pub const RESET: u32 = 1;
    /// 设置目标 IP（字符串负载）
    pub const SET_IP: u32 = 2;
    /// 设置目标端口（数值负载）
    pub const SET_PORT: u32 = 3;
}

// ============================================================================
// 事件码
// ============================================================================

/// 事件码原始位布局
///
/// bilge 使用 LSB first 位序：先声明的字段位于低位。
#[bitsize(64)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq)]
struct RawEventCode {
    sub_type: u32,   // Bit 0-31
    event_type: u32, // Bit 32-63
}

/// 拆分事件码为 `(类型, 子类型)`，不校验类型
pub fn split_event_code(code: u64) -> (u32, u32) {
    let raw = RawEventCode::from(code);
    (raw.event_type(), raw.sub_type())
}

/// 已解码的事件码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventCode {
    pub event_type: EventType,
    pub sub_type: u32,
}

impl EventCode {
    pub fn new(event_type: EventType, sub_type: u32) -> Self {
        Self {
            event_type,
            sub_type,
        }
    }

    /// 编码为 64 位事件码
    pub fn code(self) -> u64 {
        u64::from(RawEventCode::new(self.sub_type, self.event_type.into()))
    }

    /// 解码 64 位事件码
    ///
    /// # 错误
    ///
    /// 高 32 位不是已知事件类型时返回 `ProtocolError::UnknownEventType`。
    pub fn decode(code: u64) -> Result<Self, ProtocolError> {
        let (event_type, sub_type) = split_event_code(code);
        let event_type = EventType::try_from(event_type)
            .map_err(|_| ProtocolError::UnknownEventType { value: event_type })?;
        Ok(Self::new(event_type, sub_type))
    }
}

impl From<EventCode> for u64 {
    fn from(code: EventCode) -> Self {
        code.code()
    }
}

impl TryFrom<u64> for EventCode {
    type Error = ProtocolError;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        Self::decode(code)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/0x{:08X}", self.event_type, self.sub_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_event_code_layout() {
        let code = EventCode::new(EventType::GetValue, 7).code();
        assert_eq!(code, (1u64 << 32) | 7);

        let code = EventCode::new(EventType::NativeFunctions, 0xFFFF_FFFF).code();
        assert_eq!(code, (500u64 << 32) | 0xFFFF_FFFF);
    }

    #[test]
    fn test_event_code_decode() {
        let code = EventCode::decode((100u64 << 32) | 3).unwrap();
        assert_eq!(code.event_type, EventType::Connection);
        assert_eq!(code.sub_type, 3);
    }

    #[test]
    fn test_event_code_unknown_type() {
        let err = EventCode::decode(42u64 << 32).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownEventType { value: 42 });

        // 原始拆分不校验类型
        assert_eq!(split_event_code((42u64 << 32) | 9), (42, 9));
    }

    #[test]
    fn test_event_type_names() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::from_name(event_type.name()), Some(event_type));
            assert_eq!(EventType::try_from(u32::from(event_type)).ok(), Some(event_type));
        }
        assert_eq!(EventType::from_name("NoSuchType"), None);
    }

    #[test]
    fn test_base_code() {
        assert_eq!(EventType::StartListening.base_code(), 4u64 << 32);
        assert!(EventType::StartListening.is_key_command());
        assert!(!EventType::StopListening.is_key_command());
        assert!(!EventType::Connection.is_key_command());
    }

    proptest! {
        #[test]
        fn prop_event_code_round_trip(index in 0usize..20, sub_type in any::<u32>()) {
            let event_type = EventType::ALL[index];
            let code = EventCode::new(event_type, sub_type);
            prop_assert_eq!(EventCode::decode(code.code()), Ok(code));
        }
    }
}
