//! 64 位标签
//!
//! 标签的高 8 位是负载类型（[`DataType`]），低 56 位是序列号。
//! 对于监听推送，序列号位置承载的是 Key 的 wire id。

use crate::ProtocolError;
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 序列号最大值（56 位）
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

/// 负载类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DataType {
    /// UTF-8 字符串（可能以 NUL 结尾）
    String = 0,
    /// 8 字节小端序无符号整数
    Number = 1,
}

/// 标签原始位布局
#[bitsize(64)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq)]
struct RawTag {
    sequence: u56, // Bit 0-55
    data_type: u8, // Bit 56-63
}

/// 已解码的标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub data_type: DataType,
    pub sequence: u64,
}

impl Tag {
    /// 构造标签
    ///
    /// # 错误
    ///
    /// 序列号超出 56 位时返回 `ProtocolError::SequenceOutOfRange`。
    pub fn new(data_type: DataType, sequence: u64) -> Result<Self, ProtocolError> {
        if sequence > MAX_SEQUENCE {
            return Err(ProtocolError::SequenceOutOfRange { sequence });
        }
        Ok(Self {
            data_type,
            sequence,
        })
    }

    /// 编码为 64 位标签
    pub fn encode(self) -> u64 {
        // new() 已保证序列号在 56 位以内
        let raw = RawTag::new(
            u56::new(self.sequence & MAX_SEQUENCE),
            self.data_type.into(),
        );
        u64::from(raw)
    }

    /// 解码 64 位标签
    ///
    /// # 错误
    ///
    /// 高 8 位不是已知负载类型时返回 `ProtocolError::UnknownDataType`。
    /// 序列号可通过 [`tag_sequence`] 单独取出。
    pub fn decode(tag: u64) -> Result<Self, ProtocolError> {
        let raw = RawTag::from(tag);
        let value = raw.data_type();
        let data_type =
            DataType::try_from(value).map_err(|_| ProtocolError::UnknownDataType { value })?;
        Ok(Self {
            data_type,
            sequence: raw.sequence().value(),
        })
    }
}

/// 取出标签低 56 位（不校验负载类型）
pub fn tag_sequence(tag: u64) -> u64 {
    RawTag::from(tag).sequence().value()
}

/// 编码标签
///
/// # 示例
///
/// ```
/// use robomaster_protocol::{encode_tag, DataType};
///
/// assert_eq!(encode_tag(DataType::Number, 5).unwrap(), (1 << 56) | 5);
/// ```
pub fn encode_tag(data_type: DataType, sequence: u64) -> Result<u64, ProtocolError> {
    Ok(Tag::new(data_type, sequence)?.encode())
}

/// 解码标签为 `(负载类型, 序列号)`
pub fn decode_tag(tag: u64) -> Result<(DataType, u64), ProtocolError> {
    let tag = Tag::decode(tag)?;
    Ok((tag.data_type, tag.sequence))
}
