//! 日志初始化
//!
//! 安装 `tracing-subscriber` 的 fmt 订阅者（输出到 stderr），
//! 并通过 `LogTracer` 把 `log` 记录转发到 `tracing`。
//! `RUST_LOG` 环境变量优先于传入的默认过滤规则。

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// 以 `info` 级别初始化日志
///
/// 可以重复调用，只有第一次生效。
pub fn init_logger() -> bool {
    init_logger_with_filter("info")
}

/// 以指定默认过滤规则初始化日志
///
/// # 参数
///
/// - `default_directive`: `RUST_LOG` 未设置时使用的规则，如 `"robomaster_driver=debug"`
///
/// # 返回
///
/// 本次调用是否安装了全局订阅者（已被其他代码安装时返回 false）。
pub fn init_logger_with_filter(default_directive: &str) -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();

        installed = tracing::subscriber::set_global_default(subscriber).is_ok();
        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::debug!("log bridge not installed: {}", e);
        }
    });
    installed
}
