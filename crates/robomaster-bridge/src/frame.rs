//! 宿主进程通信帧
//!
//! 帧格式：`function u8 | len u16 (LE) | payload`。
//! 响应帧使用与请求相同的 function id，负载以状态字节开头（见 [`Response`]）。
//! `EventCallback`（0x80）只从宿主发往客户端，与响应帧复用同一条流。

use crate::BridgeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::{self, Read, Write};

/// 帧头长度
pub const HEADER_LEN: usize = 3;

/// 负载最大长度
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// ============================================================================
// Function Ids
// ============================================================================

/// 帧功能号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Function {
    // 客户端 → 宿主（宿主以相同功能号响应）
    Create = 0x00,
    Destroy = 0x01,
    Initialize = 0x02,
    Uninitialize = 0x03,
    SendEvent = 0x04,
    SendEventWithString = 0x05,
    SendEventWithNumber = 0x06,
    SetEventCallback = 0x07,
    GetSecurityKey = 0x08,

    // 宿主 → 客户端
    EventCallback = 0x80,
}

// ============================================================================
// Frame
// ============================================================================

/// 一个完整的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: Function,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(function: Function, payload: impl Into<Bytes>) -> Self {
        Self {
            function,
            payload: payload.into(),
        }
    }

    pub fn empty(function: Function) -> Self {
        Self::new(function, Bytes::new())
    }

    /// 编码为字节
    ///
    /// # 错误
    ///
    /// 负载超过 65535 字节时返回 `BridgeError::FrameTooLarge`。
    pub fn encode(&self) -> Result<Bytes, BridgeError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(BridgeError::FrameTooLarge { len });
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + len);
        buf.put_u8(self.function.into());
        buf.put_u16_le(len as u16);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// 写入一个完整帧并 flush
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), BridgeError> {
        let bytes = self.encode()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// 读取一个完整帧
    ///
    /// 在帧边界遇到 EOF 时返回 `Ok(None)`；帧中途 EOF 返回 IO 错误。
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Frame>, BridgeError> {
        let mut header = [0u8; HEADER_LEN];
        match reader.read_exact(&mut header[..1]) {
            Ok(()) => {},
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        reader.read_exact(&mut header[1..])?;

        let function =
            Function::try_from(header[0]).map_err(|_| BridgeError::UnknownFunction(header[0]))?;
        let len = u16::from_le_bytes([header[1], header[2]]) as usize;

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        Ok(Some(Frame::new(function, payload)))
    }
}

// ============================================================================
// Payload Layouts
// ============================================================================

fn ensure(buf: &impl Buf, needed: usize) -> Result<(), BridgeError> {
    let remaining = buf.remaining();
    if remaining < needed {
        return Err(BridgeError::Truncated { needed, remaining });
    }
    Ok(())
}

fn put_short_bytes(buf: &mut BytesMut, data: &[u8]) -> Result<(), BridgeError> {
    if data.len() > MAX_PAYLOAD_LEN {
        return Err(BridgeError::FrameTooLarge { len: data.len() });
    }
    buf.put_u16_le(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

fn get_short_bytes(buf: &mut Bytes) -> Result<Bytes, BridgeError> {
    ensure(&*buf, 2)?;
    let len = buf.get_u16_le() as usize;
    ensure(&*buf, len)?;
    Ok(buf.split_to(len))
}

/// Create 请求负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub debuggable: bool,
    pub log_path: String,
}

impl CreateRequest {
    pub fn encode(&self) -> Result<Bytes, BridgeError> {
        let mut buf = BytesMut::with_capacity(5 + self.name.len() + self.log_path.len());
        buf.put_u8(u8::from(self.debuggable));
        put_short_bytes(&mut buf, self.name.as_bytes())?;
        put_short_bytes(&mut buf, self.log_path.as_bytes())?;
        Ok(buf.freeze())
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, BridgeError> {
        ensure(&payload, 1)?;
        let debuggable = payload.get_u8() != 0;
        let name = get_short_bytes(&mut payload)?;
        let log_path = get_short_bytes(&mut payload)?;
        Ok(Self {
            name: String::from_utf8_lossy(&name).into_owned(),
            debuggable,
            log_path: String::from_utf8_lossy(&log_path).into_owned(),
        })
    }
}

/// SendEvent / SendEventWithString / EventCallback 负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPayload {
    pub event_code: u64,
    pub tag: u64,
    pub data: Bytes,
}

impl EventPayload {
    pub fn new(event_code: u64, data: impl Into<Bytes>, tag: u64) -> Self {
        Self {
            event_code,
            tag,
            data: data.into(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, BridgeError> {
        let mut buf = BytesMut::with_capacity(18 + self.data.len());
        buf.put_u64_le(self.event_code);
        buf.put_u64_le(self.tag);
        put_short_bytes(&mut buf, &self.data)?;
        Ok(buf.freeze())
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, BridgeError> {
        ensure(&payload, 16)?;
        let event_code = payload.get_u64_le();
        let tag = payload.get_u64_le();
        let data = get_short_bytes(&mut payload)?;
        Ok(Self {
            event_code,
            tag,
            data,
        })
    }
}

/// SendEventWithNumber 负载
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberEventPayload {
    pub event_code: u64,
    pub tag: u64,
    pub value: u64,
}

impl NumberEventPayload {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u64_le(self.event_code);
        buf.put_u64_le(self.tag);
        buf.put_u64_le(self.value);
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, BridgeError> {
        ensure(&payload, 24)?;
        Ok(Self {
            event_code: payload.get_u64_le(),
            tag: payload.get_u64_le(),
            value: payload.get_u64_le(),
        })
    }
}

/// SetEventCallback 负载
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCallbackPayload {
    pub event_code: u64,
    pub enabled: bool,
}

impl SetCallbackPayload {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(9);
        buf.put_u64_le(self.event_code);
        buf.put_u8(u8::from(self.enabled));
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, BridgeError> {
        ensure(&payload, 9)?;
        Ok(Self {
            event_code: payload.get_u64_le(),
            enabled: payload.get_u8() != 0,
        })
    }
}

/// 响应状态：成功
pub const STATUS_OK: u8 = 0;

/// 响应状态：宿主侧处理失败
pub const STATUS_FAILED: u8 = 1;

/// 失败消息的最大字符数
const MAX_FAILURE_MESSAGE: usize = 512;

/// 响应负载：`status u8 | body`
///
/// 成功时 body 为功能相关的返回数据，失败时为 UTF-8 错误描述。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Bytes),
    Failed(String),
}

impl Response {
    pub fn failed(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Failed(message.chars().take(MAX_FAILURE_MESSAGE).collect())
    }

    pub fn encode(&self) -> Bytes {
        let (status, body) = match self {
            Self::Ok(body) => (STATUS_OK, &body[..]),
            Self::Failed(message) => (STATUS_FAILED, message.as_bytes()),
        };
        let mut buf = BytesMut::with_capacity(1 + body.len());
        buf.put_u8(status);
        buf.put_slice(body);
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, BridgeError> {
        ensure(&payload, 1)?;
        match payload.get_u8() {
            STATUS_OK => Ok(Self::Ok(payload)),
            _ => Ok(Self::Failed(String::from_utf8_lossy(&payload).into_owned())),
        }
    }
}

/// 编码 u64 负载（GetSecurityKey 请求）
pub fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

pub fn decode_u64(mut payload: Bytes) -> Result<u64, BridgeError> {
    ensure(&payload, 8)?;
    Ok(payload.get_u64_le())
}
