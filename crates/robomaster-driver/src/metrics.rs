//! 驱动层性能指标
//!
//! 零开销的原子计数器，可以在任何线程安全地读取，不会引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 驱动层实时指标
///
/// # 使用示例
///
/// ```rust
/// use robomaster_driver::DriverMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = DriverMetrics::default();
/// metrics.events_sent.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.events_sent, 1);
/// ```
#[derive(Debug, Default)]
pub struct DriverMetrics {
    /// 成功交给传输层的出站事件数
    pub events_sent: AtomicU64,

    /// 传输层发送失败次数
    pub send_failures: AtomicU64,

    /// 进入入站队列的事件数
    pub inbound_received: AtomicU64,

    /// 入站队列满而丢弃的事件数
    ///
    /// 持续增长说明用户回调太慢，分发线程跟不上引擎推送速度。
    pub inbound_dropped: AtomicU64,

    /// 送达的单次回调数
    pub single_shot_delivered: AtomicU64,

    /// 监听推送送达次数（每个监听者计一次）
    pub listener_pushes: AtomicU64,

    /// 监听推送没有任何监听者
    pub routing_misses: AtomicU64,

    /// 未知或无处理器的事件类型
    pub unknown_events: AtomicU64,

    /// 负载解码失败（产生 error_code = -1 的结果）
    pub decode_errors: AtomicU64,

    /// 单次请求超时次数
    pub request_timeouts: AtomicU64,

    /// 用户回调 panic 次数
    pub callback_panics: AtomicU64,
}

impl DriverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            inbound_received: self.inbound_received.load(Ordering::Relaxed),
            inbound_dropped: self.inbound_dropped.load(Ordering::Relaxed),
            single_shot_delivered: self.single_shot_delivered.load(Ordering::Relaxed),
            listener_pushes: self.listener_pushes.load(Ordering::Relaxed),
            routing_misses: self.routing_misses.load(Ordering::Relaxed),
            unknown_events: self.unknown_events.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            request_timeouts: self.request_timeouts.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.events_sent,
            &self.send_failures,
            &self.inbound_received,
            &self.inbound_dropped,
            &self.single_shot_delivered,
            &self.listener_pushes,
            &self.routing_misses,
            &self.unknown_events,
            &self.decode_errors,
            &self.request_timeouts,
            &self.callback_panics,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub events_sent: u64,
    pub send_failures: u64,
    pub inbound_received: u64,
    pub inbound_dropped: u64,
    pub single_shot_delivered: u64,
    pub listener_pushes: u64,
    pub routing_misses: u64,
    pub unknown_events: u64,
    pub decode_errors: u64,
    pub request_timeouts: u64,
    pub callback_panics: u64,
}

impl MetricsSnapshot {
    /// 入站丢弃率（0.0 ~ 1.0）
    pub fn inbound_drop_rate(&self) -> f64 {
        let total = self.inbound_received + self.inbound_dropped;
        if total == 0 {
            0.0
        } else {
            self.inbound_dropped as f64 / total as f64
        }
    }
}
