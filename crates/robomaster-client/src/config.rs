//! 客户端配置
//!
//! 可以从 TOML 文件加载，缺省字段取默认值：
//!
//! ```toml
//! bridge_name = "Robomaster"
//! debuggable = false
//! log_path = ""
//! robot_ip = "192.168.2.1"
//! port = 10607
//! link_timeout_ms = 5000
//! request_timeout_ms = 10000
//! ```

use crate::error::ClientError;
use robomaster_driver::ControllerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 引擎默认连接端口
pub const DEFAULT_PORT: u16 = 10607;

/// 机器人直连模式下的默认地址
pub const DEFAULT_ROBOT_IP: &str = "192.168.2.1";

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 引擎实例名称
    pub bridge_name: String,
    /// 是否开启引擎调试
    pub debuggable: bool,
    /// 引擎日志目录（空字符串表示不写日志）
    pub log_path: String,
    /// 机器人 IP
    pub robot_ip: String,
    /// 连接端口
    pub port: u16,
    /// 等待链路建立的超时（毫秒）
    pub link_timeout_ms: u64,
    /// 单次请求超时（毫秒，0 表示永不超时）
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bridge_name: "Robomaster".to_string(),
            debuggable: false,
            log_path: String::new(),
            robot_ip: DEFAULT_ROBOT_IP.to_string(),
            port: DEFAULT_PORT,
            link_timeout_ms: 5000,
            request_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    /// 从 TOML 文本解析
    pub fn from_toml_str(text: &str) -> Result<Self, ClientError> {
        toml::from_str(text).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// 序列化为 TOML 文本
    pub fn to_toml_string(&self) -> Result<String, ClientError> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }

    /// 对应的控制器配置
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            request_timeout: (self.request_timeout_ms > 0)
                .then(|| Duration::from_millis(self.request_timeout_ms)),
            ..ControllerConfig::default()
        }
    }
}
