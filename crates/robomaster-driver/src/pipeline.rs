//! 分发线程模块
//!
//! 传输层回调只做一件事：把事件放进有界队列（`try_send`，不阻塞引擎线程）。
//! 唯一的分发线程从队列取事件交给 [`Router`]，并按 `sweep_interval`
//! 周期清理超时的单次请求。

use crate::metrics::DriverMetrics;
use crate::router::Router;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use robomaster_bridge::EventSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// 控制器配置
///
/// # Example
///
/// ```
/// use robomaster_driver::ControllerConfig;
/// use std::time::Duration;
///
/// // 使用默认配置（队列 1024，请求超时 10s）
/// let config = ControllerConfig::default();
///
/// // 不清理超时请求
/// let config = ControllerConfig {
///     request_timeout: None,
///     ..ControllerConfig::default()
/// };
/// assert_eq!(config.sweep_interval, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// 传输回调与分发线程之间的队列容量
    ///
    /// 队列满时新事件被丢弃并计数。
    pub inbound_queue_capacity: usize,
    /// 单次请求超时（`None` 表示永不超时）
    pub request_timeout: Option<Duration>,
    /// 阻塞读取缓存值的最长等待时间
    pub cached_value_timeout: Duration,
    /// 分发线程的清理周期
    pub sweep_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            inbound_queue_capacity: 1024,
            request_timeout: Some(Duration::from_secs(10)),
            cached_value_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(100),
        }
    }
}

/// 队列中的入站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub event_code: u64,
    pub data: Vec<u8>,
    pub tag: u64,
}

/// 构造交给传输层的入站回调
///
/// 回调在引擎的投递线程上执行，只复制负载并 `try_send`。
pub(crate) fn inbound_sink(tx: Sender<InboundEvent>, metrics: Arc<DriverMetrics>) -> EventSink {
    Arc::new(move |event_code: u64, data: &[u8], tag: u64| {
        let event = InboundEvent {
            event_code,
            data: data.to_vec(),
            tag,
        };
        match tx.try_send(event) {
            Ok(()) => DriverMetrics::incr(&metrics.inbound_received),
            Err(TrySendError::Full(_)) => {
                DriverMetrics::incr(&metrics.inbound_dropped);
                warn!(
                    "Inbound queue full, dropping event 0x{:016X} (tag 0x{:016X})",
                    event_code, tag
                );
            },
            Err(TrySendError::Disconnected(_)) => {
                trace!("Dispatcher stopped, event 0x{:016X} ignored", event_code);
            },
        }
    })
}

/// 分发线程主循环
///
/// `is_running` 置为 false 或所有发送端关闭后退出；退出时队列中剩余的事件被丢弃。
pub(crate) fn dispatch_loop(
    rx: Receiver<InboundEvent>,
    router: Arc<Router>,
    config: ControllerConfig,
    is_running: Arc<AtomicBool>,
) {
    let mut last_sweep = Instant::now();

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("Dispatch loop: stop requested");
            break;
        }

        match rx.recv_timeout(config.sweep_interval) {
            Ok(event) => {
                if !is_running.load(Ordering::Acquire) {
                    break;
                }
                router.route(event.event_code, &event.data, event.tag);
            },
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => {
                trace!("Dispatch loop: inbound channel closed");
                break;
            },
        }

        if let Some(timeout) = config.request_timeout
            && last_sweep.elapsed() >= config.sweep_interval
        {
            router.expire(timeout);
            last_sweep = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{CallbackKind, CallbackRegistry};
    use robomaster_protocol::KeyRegistry;
    use std::thread;

    #[test]
    fn test_sink_drops_when_queue_full() {
        let metrics = Arc::new(DriverMetrics::new());
        let (tx, rx) = crossbeam_channel::bounded(2);
        let sink = inbound_sink(tx, metrics.clone());

        for tag in 0..5 {
            sink(1u64 << 32, b"x", tag);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.inbound_received, 2);
        assert_eq!(snapshot.inbound_dropped, 3);
        // 先到的事件保留，顺序不变
        assert_eq!(rx.try_recv().unwrap().tag, 0);
        assert_eq!(rx.try_recv().unwrap().tag, 1);
    }

    #[test]
    fn test_sink_after_disconnect_is_silent() {
        let metrics = Arc::new(DriverMetrics::new());
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        let sink = inbound_sink(tx, metrics.clone());
        sink(0, b"", 0);
        assert_eq!(metrics.snapshot(), Default::default());
    }

    #[test]
    fn test_dispatch_loop_expires_requests() {
        let callbacks = Arc::new(CallbackRegistry::new());
        let metrics = Arc::new(DriverMetrics::new());
        let router = Arc::new(Router::new(
            Arc::new(KeyRegistry::builtin().clone()),
            callbacks.clone(),
            metrics.clone(),
        ));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        callbacks.add_single_shot(
            CallbackKind::Getter,
            1,
            0,
            Box::new(move |result| {
                let _ = done_tx.send(result.error_code);
            }),
        );

        let (_tx, rx) = crossbeam_channel::bounded::<InboundEvent>(4);
        let is_running = Arc::new(AtomicBool::new(true));
        let config = ControllerConfig {
            request_timeout: Some(Duration::from_millis(20)),
            sweep_interval: Duration::from_millis(5),
            ..ControllerConfig::default()
        };
        let running = is_running.clone();
        let worker = thread::spawn(move || dispatch_loop(rx, router, config, running));

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)).unwrap(), -2);

        is_running.store(false, Ordering::Release);
        worker.join().unwrap();
        assert_eq!(metrics.snapshot().request_timeouts, 1);
    }

    #[test]
    fn test_dispatch_loop_exits_on_disconnect() {
        let router = Arc::new(Router::new(
            Arc::new(KeyRegistry::builtin().clone()),
            Arc::new(CallbackRegistry::new()),
            Arc::new(DriverMetrics::new()),
        ));
        let (tx, rx) = crossbeam_channel::bounded::<InboundEvent>(4);
        let worker = thread::spawn(move || {
            dispatch_loop(
                rx,
                router,
                ControllerConfig::default(),
                Arc::new(AtomicBool::new(true)),
            )
        });
        drop(tx);
        worker.join().unwrap();
    }
}
