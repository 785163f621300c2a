//! # RoboMaster Driver
//!
//! 命令/事件关联引擎：把出站 Key 命令与引擎异步送回的结果对应起来。
//!
//! ## 组件
//!
//! - `callbacks`: 单次回调表与监听者集合（同一把锁保护）
//! - `controller`: 命令分发器（对外 API）
//! - `router`: 入站事件路由
//! - `pipeline`: 分发线程与配置
//! - `hooks`: 按事件类型注册的原始事件处理器
//! - `metrics`: 原子计数器
//!
//! ## 线程模型
//!
//! 传输层回调只把事件放入有界队列；唯一的分发线程负责解码、路由和超时清理。
//! 所有用户回调都在分发线程（或多监听者时的作用域线程）上执行，
//! 执行期间不持有任何内部锁。

pub mod builder;
pub mod callbacks;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod pipeline;
pub mod router;

pub use builder::ControllerBuilder;
pub use callbacks::{CallbackKind, CallbackRegistry, ListenerCallback, ListenerId, ResultCallback};
pub use controller::CommandController;
pub use error::DriverError;
pub use hooks::{EventHandler, HookManager, RawEvent};
pub use metrics::{DriverMetrics, MetricsSnapshot};
pub use pipeline::{ControllerConfig, InboundEvent};
pub use router::{PushProgress, Router, TIMEOUT_ERROR_CODE};
