//! 入站事件路由
//!
//! 对每个入站事件：
//!
//! 1. 解码事件码，未知类别记录日志后丢弃
//! 2. 触发该类别的原始事件钩子
//! 3. 单次命令类别：按 `(种类, 标签序列号)` 取出回调并调用一次
//! 4. `StartListening` 推送：扇出给该 Key 的所有监听者
//!
//! 用户回调全部在锁外调用，且包裹 `catch_unwind`，
//! 单个回调 panic 不会影响其他回调或分发线程。
//!
//! 每个推送在所有监听者返回后才算处理完成，完成进度由 [`PushProgress`] 公布。

use crate::callbacks::{CallbackKind, CallbackRegistry, ListenerCallback, ResultCallback};
use crate::hooks::{EventHandler, HookManager, RawEvent};
use crate::metrics::DriverMetrics;
use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex};
use robomaster_protocol::{
    EventCode, EventType, KeyRegistry, KeyResult, Payload, SYNTHETIC_ERROR_CODE, Tag,
    split_event_code, tag_sequence,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// 请求超时时合成结果使用的错误码
pub const TIMEOUT_ERROR_CODE: i64 = -2;

// ============================================================
// 推送完成进度
// ============================================================

#[derive(Debug, Default)]
struct PushState {
    /// 正在扇出的推送编号
    current: Option<u64>,
    /// 最近一个处理完成的推送编号
    completed: u64,
    next: u64,
}

/// 推送处理进度
///
/// 分发线程为每个推送分配递增编号，所有监听者返回后标记完成。
/// 监听者在回调内通过 [`current`](Self::current) 取得本次推送的编号，
/// 其他线程据此用 [`wait_completed`](Self::wait_completed) 等待该推送处理完毕。
#[derive(Debug, Default)]
pub struct PushProgress {
    state: Mutex<PushState>,
    done: Condvar,
}

impl PushProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// 正在扇出的推送编号（不在推送处理中时为 `None`）
    pub fn current(&self) -> Option<u64> {
        self.state.lock().current
    }

    /// 最近一个处理完成的推送编号
    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// 等待编号为 `push` 的推送处理完成
    ///
    /// 截止时间前完成返回 `true`。
    pub fn wait_completed(&self, push: u64, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        while state.completed < push {
            if self.done.wait_until(&mut state, deadline).timed_out() {
                return state.completed >= push;
            }
        }
        true
    }

    fn begin(&self) -> u64 {
        let mut state = self.state.lock();
        state.next += 1;
        state.current = Some(state.next);
        state.next
    }

    fn finish(&self, push: u64) {
        let mut state = self.state.lock();
        state.current = None;
        state.completed = state.completed.max(push);
        self.done.notify_all();
    }
}

/// 入站事件路由器
pub struct Router {
    keys: Arc<KeyRegistry>,
    callbacks: Arc<CallbackRegistry>,
    hooks: ArcSwap<HookManager>,
    metrics: Arc<DriverMetrics>,
    pushes: Arc<PushProgress>,
}

impl Router {
    pub fn new(
        keys: Arc<KeyRegistry>,
        callbacks: Arc<CallbackRegistry>,
        metrics: Arc<DriverMetrics>,
    ) -> Self {
        Self {
            keys,
            callbacks,
            hooks: ArcSwap::from_pointee(HookManager::new()),
            metrics,
            pushes: Arc::new(PushProgress::new()),
        }
    }

    pub fn push_progress(&self) -> &Arc<PushProgress> {
        &self.pushes
    }

    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    /// 注册原始事件处理器
    pub fn add_handler(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.hooks.rcu(|current| {
            let mut next = HookManager::clone(current);
            next.add_handler(event_type, handler.clone());
            next
        });
    }

    pub fn clear_handlers(&self) {
        self.hooks.store(Arc::new(HookManager::new()));
    }

    pub fn hooks(&self) -> Arc<HookManager> {
        self.hooks.load_full()
    }

    /// 路由一个入站事件
    ///
    /// 永远不会 panic；无法处理的事件记录日志后丢弃。
    pub fn route(&self, event_code: u64, data: &[u8], tag: u64) {
        let code = match EventCode::decode(event_code) {
            Ok(code) => code,
            Err(e) => {
                let (raw_type, _) = split_event_code(event_code);
                warn!("Dropping event 0x{:016X}: {} (type {})", event_code, e, raw_type);
                DriverMetrics::incr(&self.metrics.unknown_events);
                return;
            },
        };

        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(
                "Inbound {} tag=0x{:016X} data={}",
                code,
                tag,
                hex::encode(&data[..data.len().min(64)])
            );
        }

        let handled = self.run_hooks(&RawEvent { code, data, tag });

        match code.event_type {
            EventType::GetValue
            | EventType::SetValue
            | EventType::PerformAction
            | EventType::GetAvailableValue => {
                if let Some(kind) = CallbackKind::for_event_type(code.event_type) {
                    self.deliver_single_shot(kind, data, tag);
                }
            },
            EventType::StartListening => self.deliver_push(code, data, tag),
            other => {
                if handled == 0 {
                    debug!("No handler for {} event, dropped", other);
                    DriverMetrics::incr(&self.metrics.unknown_events);
                }
            },
        }
    }

    /// 让所有超过 `timeout` 的单次请求以 `error_code == -2` 完成
    pub fn expire(&self, timeout: Duration) -> usize {
        let expired = self.callbacks.expire_older_than(timeout);
        let count = expired.len();
        for request in expired {
            warn!(
                "{:?} request #{} for key 0x{:08X} timed out after {:?}",
                request.kind, request.sequence, request.wire_id, timeout
            );
            DriverMetrics::incr(&self.metrics.request_timeouts);

            let mut result = KeyResult::failure(TIMEOUT_ERROR_CODE, "request timed out");
            result.key = self.keys.by_wire_id(request.wire_id).ok();
            result.wire_id = request.wire_id;
            result.sequence = request.sequence as u32;
            self.invoke_single_shot(request.callback, result);
        }
        count
    }

    // ============================================================
    // 内部实现
    // ============================================================

    fn run_hooks(&self, event: &RawEvent<'_>) -> usize {
        let hooks = self.hooks.load();
        let handlers = hooks.handlers(event.code.event_type);
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler.on_event(event))).is_err() {
                error!("Event handler for {} panicked", event.code.event_type);
                DriverMetrics::incr(&self.metrics.callback_panics);
            }
        }
        handlers.len()
    }

    fn decode(&self, data: &[u8], tag: u64) -> KeyResult {
        let payload = Tag::decode(tag).and_then(|tag| Payload::decode(tag.data_type, data));
        let result = KeyResult::from_payload(payload, &self.keys);
        if result.error_code == SYNTHETIC_ERROR_CODE {
            debug!("Undecodable result: {}", result.error_description);
            DriverMetrics::incr(&self.metrics.decode_errors);
        }
        result
    }

    fn deliver_single_shot(&self, kind: CallbackKind, data: &[u8], tag: u64) {
        let sequence = tag_sequence(tag);
        let Some(callback) = self.callbacks.take_single_shot(kind, sequence) else {
            trace!("No pending {:?} callback for #{}, dropped", kind, sequence);
            return;
        };
        let result = self.decode(data, tag);
        self.invoke_single_shot(callback, result);
    }

    fn deliver_push(&self, code: EventCode, data: &[u8], tag: u64) {
        // 订阅确认不携带负载
        if data.iter().all(|b| *b == 0) {
            trace!("Listening ack for 0x{:08X}", code.sub_type);
            return;
        }

        let result = self.decode(data, tag);
        let wire_id = if result.wire_id != 0 {
            result.wire_id
        } else {
            match u32::try_from(tag_sequence(tag)) {
                Ok(sequence) if sequence != 0 => sequence,
                _ => code.sub_type,
            }
        };
        let push = self.pushes.begin();
        self.fan_out(wire_id, &result);
        self.pushes.finish(push);
    }

    fn fan_out(&self, wire_id: u32, result: &KeyResult) {
        let listeners = self.callbacks.listeners(wire_id);
        match listeners.len() {
            0 => {
                warn!("Routing miss: no listener for key 0x{:08X}", wire_id);
                DriverMetrics::incr(&self.metrics.routing_misses);
            },
            1 => self.invoke_listener(&listeners[0], result),
            _ => thread::scope(|scope| {
                for listener in &listeners {
                    let spawned = thread::Builder::new()
                        .name("robomaster-fanout".into())
                        .spawn_scoped(scope, move || self.invoke_listener(listener, result));
                    if let Err(e) = spawned {
                        debug!("Fan-out thread spawn failed ({}), invoking inline", e);
                        self.invoke_listener(listener, result);
                    }
                }
            }),
        }
    }

    fn invoke_single_shot(&self, callback: ResultCallback, result: KeyResult) {
        if catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
            error!("Result callback panicked");
            DriverMetrics::incr(&self.metrics.callback_panics);
        } else {
            DriverMetrics::incr(&self.metrics.single_shot_delivered);
        }
    }

    fn invoke_listener(&self, listener: &ListenerCallback, result: &KeyResult) {
        if catch_unwind(AssertUnwindSafe(|| listener(result))).is_err() {
            error!("Listener callback for key 0x{:08X} panicked", result.wire_id);
            DriverMetrics::incr(&self.metrics.callback_panics);
        } else {
            DriverMetrics::incr(&self.metrics.listener_pushes);
        }
    }
}
