//! Key 结果信封
//!
//! 引擎对 Key 命令的响应和监听推送都是一个 JSON 对象：
//!
//! ```text
//! {"Tag": <序列号>, "Key": <wire id>, "Error": <错误码>, "Value": <值>}
//! ```
//!
//! 解析永远不会失败：空负载、非法 JSON 或缺失字段都会得到
//! `error_code == -1` 的合成结果。

use crate::{Key, KeyRegistry, Payload, ProtocolError};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// 合成失败结果使用的错误码
pub const SYNTHETIC_ERROR_CODE: i64 = -1;

/// Key 命令结果
#[derive(Debug, Clone, PartialEq)]
pub struct KeyResult {
    /// 反查到的 Key（wire id 不在目录中时为 `None`）
    pub key: Option<Key>,
    /// 信封中的 wire id（未解析出时为 0）
    pub wire_id: u32,
    /// 信封中的序列号
    pub sequence: u32,
    pub value: Value,
    pub error_code: i64,
    pub error_description: String,
}

impl KeyResult {
    /// 构造合成失败结果
    pub fn failure(error_code: i64, description: impl Into<String>) -> Self {
        Self {
            key: None,
            wire_id: 0,
            sequence: 0,
            value: Value::Null,
            error_code,
            error_description: description.into(),
        }
    }

    /// 构造成功结果
    pub fn success(key: Key, sequence: u32, value: Value) -> Self {
        Self {
            key: Some(key),
            wire_id: key.wire_id(),
            sequence,
            value,
            error_code: 0,
            error_description: String::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error_code == 0
    }

    /// 从 JSON 文本解析结果信封
    pub fn from_json(text: &str, keys: &KeyRegistry) -> Self {
        if text.trim().is_empty() {
            return Self::failure(SYNTHETIC_ERROR_CODE, "empty or nil json data");
        }

        let map: Map<String, Value> = match serde_json::from_str(text) {
            Ok(map) => map,
            Err(_) => {
                return Self::failure(
                    SYNTHETIC_ERROR_CODE,
                    format!("invalid json data: {text}"),
                );
            },
        };

        let (Some(sequence), Some(wire_id), Some(error_code)) = (
            number_field(&map, "Tag"),
            number_field(&map, "Key"),
            signed_field(&map, "Error"),
        ) else {
            return Self::failure(
                SYNTHETIC_ERROR_CODE,
                format!("missing or non-numeric envelope field: {text}"),
            );
        };

        let (Ok(wire_id), Ok(sequence)) = (u32::try_from(wire_id), u32::try_from(sequence)) else {
            return Self::failure(
                SYNTHETIC_ERROR_CODE,
                format!("envelope field out of range: {text}"),
            );
        };
        let mut result = Self {
            key: keys.by_wire_id(wire_id).ok(),
            wire_id,
            sequence,
            value: map.get("Value").cloned().unwrap_or(Value::Null),
            error_code,
            error_description: String::new(),
        };

        if result.value.is_null() {
            result.error_code = SYNTHETIC_ERROR_CODE;
            result.error_description = "missing value".to_string();
        } else if result.error_code != 0 {
            result.error_description = format!("engine error {}", result.error_code);
        }
        result
    }

    /// 从已解码负载解析结果
    ///
    /// 数值负载不携带信封，得到合成失败结果。
    pub fn from_payload(payload: Result<Payload, ProtocolError>, keys: &KeyRegistry) -> Self {
        match payload {
            Ok(Payload::Text(text)) => Self::from_json(&text, keys),
            Ok(Payload::Number(n)) => Self::failure(
                SYNTHETIC_ERROR_CODE,
                format!("unexpected numeric payload: {n}"),
            ),
            Err(e) => Self::failure(SYNTHETIC_ERROR_CODE, e.to_string()),
        }
    }

    pub fn value_bool(&self) -> Option<bool> {
        match &self.value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    pub fn value_i64(&self) -> Option<i64> {
        match &self.value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn value_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn value_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// 将值反序列化为结构体
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.value.clone()).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// 读取非负数值字段（JSON 数值可能以浮点形式出现）
fn number_field(map: &Map<String, Value>, name: &str) -> Option<u64> {
    let value = map.get(name)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

fn signed_field(map: &Map<String, Value>, name: &str) -> Option<i64> {
    let value = map.get(name)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}
