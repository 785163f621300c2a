//! 入站负载解码
//!
//! 负载按标签中的 [`DataType`] 解释：字符串负载截断到第一个 NUL，
//! 数值负载为小端序整数。

use crate::{DataType, ProtocolError};

/// 解码后的负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Number(u64),
}

impl Payload {
    /// 按负载类型解码原始字节
    ///
    /// # 错误
    ///
    /// 数值负载不足 4 字节时返回 `ProtocolError::PayloadTooShort`。
    /// 4 到 7 字节的数值负载按 u32 解释。
    pub fn decode(data_type: DataType, data: &[u8]) -> Result<Self, ProtocolError> {
        match data_type {
            DataType::String => {
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                Ok(Payload::Text(
                    String::from_utf8_lossy(&data[..end]).into_owned(),
                ))
            },
            DataType::Number => {
                if let Some(bytes) = data.get(..8) {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(bytes);
                    Ok(Payload::Number(u64::from_le_bytes(buf)))
                } else if let Some(bytes) = data.get(..4) {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(bytes);
                    Ok(Payload::Number(u64::from(u32::from_le_bytes(buf))))
                } else {
                    Err(ProtocolError::PayloadTooShort {
                        expected: 4,
                        actual: data.len(),
                    })
                }
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            Payload::Number(n) => Some(*n),
            Payload::Text(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_trimmed_at_nul() {
        let payload = Payload::decode(DataType::String, b"{\"a\":1}\0garbage").unwrap();
        assert_eq!(payload, Payload::Text("{\"a\":1}".to_string()));
    }

    #[test]
    fn test_text_empty() {
        let payload = Payload::decode(DataType::String, b"").unwrap();
        assert_eq!(payload.as_text(), Some(""));
        assert_eq!(payload.as_number(), None);
    }

    #[test]
    fn test_number_little_endian() {
        let payload = Payload::decode(DataType::Number, &42u64.to_le_bytes()).unwrap();
        assert_eq!(payload, Payload::Number(42));

        let payload = Payload::decode(DataType::Number, &7u32.to_le_bytes()).unwrap();
        assert_eq!(payload, Payload::Number(7));
    }

    #[test]
    fn test_number_too_short() {
        let err = Payload::decode(DataType::Number, &[1, 2]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PayloadTooShort {
                expected: 4,
                actual: 2
            }
        );
    }
}
