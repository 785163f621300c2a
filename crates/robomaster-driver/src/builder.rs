//! Builder 模式实现
//!
//! 提供链式构造 `CommandController` 实例的便捷方式。

use crate::controller::CommandController;
use crate::error::DriverError;
use crate::pipeline::ControllerConfig;
use robomaster_bridge::Transport;
use robomaster_protocol::KeyRegistry;
use std::sync::Arc;
use std::time::Duration;

/// CommandController Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use robomaster_driver::ControllerBuilder;
/// use std::time::Duration;
/// # fn demo(bridge: std::sync::Arc<dyn robomaster_bridge::Transport>) {
///
/// // 使用默认配置
/// let controller = ControllerBuilder::new().build(bridge.clone()).unwrap();
///
/// // 更长的请求超时，更小的入站队列
/// let controller = ControllerBuilder::new()
///     .request_timeout(Some(Duration::from_secs(30)))
///     .inbound_queue_capacity(256)
///     .build(bridge)
///     .unwrap();
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ControllerBuilder {
    config: ControllerConfig,
    /// Key 目录（默认使用内置目录）
    keys: Option<Arc<KeyRegistry>>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换配置
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_queue_capacity = capacity;
        self
    }

    /// 单次请求超时（`None` 表示永不超时）
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn cached_value_timeout(mut self, timeout: Duration) -> Self {
        self.config.cached_value_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// 使用自定义 Key 目录
    pub fn key_registry(mut self, keys: Arc<KeyRegistry>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// 构建控制器并向传输层注册入站回调
    ///
    /// # 错误
    ///
    /// - `DriverError::InvalidInput`: 配置无效
    /// - `DriverError::Bridge`: 传输层注册失败
    pub fn build(self, bridge: Arc<dyn Transport>) -> Result<CommandController, DriverError> {
        let keys = self
            .keys
            .unwrap_or_else(|| Arc::new(KeyRegistry::builtin().clone()));
        CommandController::with_config(bridge, self.config, keys)
    }
}
