//! # RoboMaster Protocol
//!
//! Unity Bridge 事件协议定义（无传输层依赖）
//!
//! ## 模块
//!
//! - `event`: 事件类型与 64 位事件码
//! - `tag`: 64 位标签（负载类型 + 序列号）
//! - `keys`: 能力（Key）目录与访问权限
//! - `result`: JSON 结果信封解析
//! - `payload`: 入站负载解码
//! - `param`: 出站参数值编码
//!
//! ## 编码约定
//!
//! - 事件码：`类型 << 32 | 子类型`
//! - 标签：`负载类型 << 56 | 序列号`（序列号 56 位）
//! - 数值负载：8 字节小端序无符号整数

pub mod event;
pub mod keys;
pub mod param;
pub mod payload;
pub mod result;
pub mod tag;

// 重新导出常用类型
pub use event::*;
pub use keys::{AccessType, Key, KeyRegistry, ValueShape};
pub use param::*;
pub use payload::Payload;
pub use result::{KeyResult, SYNTHETIC_ERROR_CODE};
pub use tag::*;

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown event type: {value}")]
    UnknownEventType { value: u32 },

    #[error("Unknown payload data type: {value}")]
    UnknownDataType { value: u8 },

    #[error("Sequence {sequence} exceeds 56 bits")]
    SequenceOutOfRange { sequence: u64 },

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Duplicate key wire id: 0x{wire_id:08X}")]
    DuplicateKey { wire_id: u32 },

    #[error("Payload too short: expected at least {expected} bytes, got {actual}")]
    PayloadTooShort { expected: usize, actual: usize },

    #[error("Value encoding failed: {0}")]
    Encode(String),
}
