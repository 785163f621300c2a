//! 命令分发器
//!
//! [`CommandController`] 是驱动层的对外 API：把 Key 命令编码成事件码和标签交给传输层，
//! 在发送前登记回调，由分发线程把引擎的应答关联回调用方。

use crate::callbacks::{CallbackKind, CallbackRegistry, ListenerCallback, ListenerId, ResultCallback};
use crate::error::DriverError;
use crate::hooks::EventHandler;
use crate::metrics::DriverMetrics;
use crate::pipeline::{ControllerConfig, dispatch_loop, inbound_sink};
use crate::router::{PushProgress, Router};
use parking_lot::Mutex;
use robomaster_bridge::{EventSink, Transport};
use robomaster_protocol::{
    AccessType, DataType, EventCode, EventType, Key, KeyRegistry, KeyResult, encode_tag,
    encode_value,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, ThreadId, spawn};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 构造时就向传输层注册入站回调的事件类型
const COMMAND_EVENT_TYPES: [EventType; 5] = [
    EventType::SetValue,
    EventType::GetValue,
    EventType::GetAvailableValue,
    EventType::PerformAction,
    EventType::StartListening,
];

/// 带超时的线程 join
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(Box::new(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "Thread join timeout"),
            )),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "Thread panicked during join",
                )))
            },
        }
    }
}

/// 命令分发器（对外 API）
///
/// 所有方法接受 `&self`，可以从任意线程并发调用。
///
/// # 示例
///
/// ```no_run
/// use robomaster_driver::ControllerBuilder;
/// use robomaster_protocol::keys::AIR_LINK_CONNECTION;
/// # fn demo(bridge: std::sync::Arc<dyn robomaster_bridge::Transport>) -> Result<(), robomaster_driver::DriverError> {
/// let controller = ControllerBuilder::new().build(bridge)?;
/// controller.get_value(AIR_LINK_CONNECTION, |result| {
///     println!("link: {:?}", result.value_bool());
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct CommandController {
    bridge: Arc<dyn Transport>,
    keys: Arc<KeyRegistry>,
    callbacks: Arc<CallbackRegistry>,
    router: Arc<Router>,
    metrics: Arc<DriverMetrics>,
    config: ControllerConfig,
    sink: Mutex<Option<EventSink>>,
    /// 已向传输层注册入站回调的事件类型
    registered: Mutex<BTreeSet<EventType>>,
    /// 串行化监听者增删与对应的 Start/StopListening 发送
    subscriptions: Mutex<()>,
    is_running: Arc<AtomicBool>,
    torn_down: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl CommandController {
    /// 使用默认配置和内置 Key 目录创建控制器
    ///
    /// # 错误
    ///
    /// 向传输层注册入站回调失败时返回 `DriverError::Bridge`。
    pub fn new(bridge: Arc<dyn Transport>) -> Result<Self, DriverError> {
        Self::with_config(
            bridge,
            ControllerConfig::default(),
            Arc::new(KeyRegistry::builtin().clone()),
        )
    }

    /// 使用指定配置创建控制器
    ///
    /// # 错误
    ///
    /// - `DriverError::InvalidInput`: 队列容量为 0 或清理周期为 0
    /// - `DriverError::Bridge`: 注册入站回调失败
    pub fn with_config(
        bridge: Arc<dyn Transport>,
        config: ControllerConfig,
        keys: Arc<KeyRegistry>,
    ) -> Result<Self, DriverError> {
        if config.inbound_queue_capacity == 0 {
            return Err(DriverError::InvalidInput(
                "inbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        if config.sweep_interval.is_zero() {
            return Err(DriverError::InvalidInput(
                "sweep_interval must be non-zero".to_string(),
            ));
        }

        let callbacks = Arc::new(CallbackRegistry::new());
        let metrics = Arc::new(DriverMetrics::new());
        let router = Arc::new(Router::new(keys.clone(), callbacks.clone(), metrics.clone()));
        let is_running = Arc::new(AtomicBool::new(true));

        let (tx, rx) = crossbeam_channel::bounded(config.inbound_queue_capacity);
        let worker = std::thread::Builder::new()
            .name("robomaster-dispatch".into())
            .spawn({
                let router = router.clone();
                let config = config.clone();
                let is_running = is_running.clone();
                move || dispatch_loop(rx, router, config, is_running)
            })
            .map_err(robomaster_bridge::BridgeError::Io)?;
        let worker_id = worker.thread().id();

        let controller = Self {
            bridge,
            keys,
            callbacks,
            router,
            sink: Mutex::new(Some(inbound_sink(tx, metrics.clone()))),
            metrics,
            config,
            registered: Mutex::new(BTreeSet::new()),
            subscriptions: Mutex::new(()),
            is_running,
            torn_down: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
            worker_id,
        };

        for event_type in COMMAND_EVENT_TYPES {
            // 失败时 Drop 负责注销已注册的回调并停止分发线程
            controller.register_sink(event_type)?;
        }

        info!(
            "Command controller started (queue {}, request timeout {:?})",
            controller.config.inbound_queue_capacity, controller.config.request_timeout
        );
        Ok(controller)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    pub fn metrics(&self) -> &DriverMetrics {
        &self.metrics
    }

    /// 未完成的单次请求数
    pub fn pending_requests(&self) -> usize {
        self.callbacks.pending_count()
    }

    /// 该 Key 当前的监听者数量
    pub fn listener_count(&self, key: Key) -> usize {
        self.callbacks.listener_count(key.wire_id())
    }

    /// 推送处理进度，用于等待某次推送的全部监听者返回
    pub fn push_progress(&self) -> Arc<PushProgress> {
        self.router.push_progress().clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    // ============================================================
    // 单次命令
    // ============================================================

    /// 读取 Key 当前值
    ///
    /// 回调在分发线程上至多被调用一次。
    ///
    /// # 错误
    ///
    /// - `DriverError::AccessDenied`: Key 不可读（不发送任何事件）
    /// - `DriverError::Bridge`: 发送失败（回调被移除，不会被调用）
    pub fn get_value<F>(&self, key: Key, callback: F) -> Result<(), DriverError>
    where
        F: FnOnce(KeyResult) + Send + 'static,
    {
        self.ensure_running()?;
        self.check_access(key, AccessType::READ)?;
        self.request(EventType::GetValue, key, &[], Some(Box::new(callback)))
            .map(|_| ())
    }

    /// 写入 Key 的值
    ///
    /// 值被编码为 `{"Value": value}`。`callback` 为 `None` 时标签为 0，应答被丢弃。
    ///
    /// # 错误
    ///
    /// - `DriverError::AccessDenied`: Key 不可写
    /// - `DriverError::Protocol`: 值无法序列化
    /// - `DriverError::Bridge`: 发送失败
    pub fn set_value<T>(
        &self,
        key: Key,
        value: &T,
        callback: Option<ResultCallback>,
    ) -> Result<(), DriverError>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_running()?;
        self.check_access(key, AccessType::WRITE)?;
        let payload = encode_value(value)?;
        self.request(EventType::SetValue, key, &payload, callback)
            .map(|_| ())
    }

    /// 执行动作
    ///
    /// `value` 为 `None` 时负载为空。
    pub fn perform_action(
        &self,
        key: Key,
        value: Option<serde_json::Value>,
        callback: Option<ResultCallback>,
    ) -> Result<(), DriverError> {
        self.ensure_running()?;
        self.check_access(key, AccessType::ACTION)?;
        let payload = match value {
            Some(value) => encode_value(&value)?,
            None => Vec::new(),
        };
        self.request(EventType::PerformAction, key, &payload, callback)
            .map(|_| ())
    }

    /// 以数值负载直接发送动作（不关联应答）
    ///
    /// 用于高频控制量，例如打包后的虚拟摇杆。
    pub fn direct_send(&self, key: Key, value: u64) -> Result<(), DriverError> {
        self.ensure_running()?;
        self.check_access(key, AccessType::ACTION)?;
        let code = EventCode::new(EventType::PerformAction, key.wire_id()).code();
        self.send(|bridge| bridge.send_event_with_number(code, value, 0))?;
        trace!("DirectSend {} = 0x{:016X}", key.name(), value);
        Ok(())
    }

    /// 阻塞读取引擎缓存的值
    ///
    /// 最长等待 `cached_value_timeout`。不能在分发线程（即任何回调内部）调用。
    ///
    /// # 错误
    ///
    /// - `DriverError::InvalidInput`: 在分发线程上调用
    /// - `DriverError::Timeout`: 等待超时（回调被移除）
    pub fn get_available_value(&self, key: Key) -> Result<KeyResult, DriverError> {
        self.ensure_running()?;
        self.check_access(key, AccessType::READ)?;
        if std::thread::current().id() == self.worker_id {
            return Err(DriverError::InvalidInput(
                "blocking get_available_value called from the dispatch thread".to_string(),
            ));
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let sequence = self.request(
            EventType::GetAvailableValue,
            key,
            &[],
            Some(Box::new(move |result| {
                let _ = tx.try_send(result);
            })),
        )?;

        match rx.recv_timeout(self.config.cached_value_timeout) {
            Ok(result) => Ok(result),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                self.callbacks
                    .take_single_shot(CallbackKind::AvailableValue, sequence);
                DriverMetrics::incr(&self.metrics.request_timeouts);
                debug!(
                    "GetAvailableValue {} timed out after {:?}",
                    key.name(),
                    self.config.cached_value_timeout
                );
                Err(DriverError::Timeout)
            },
            // 回调在调用前被丢弃：控制器已拆除
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(DriverError::TornDown),
        }
    }

    /// 查询安全密钥
    pub fn security_key(&self, index: u64) -> Result<String, DriverError> {
        self.ensure_running()?;
        Ok(self.bridge.get_security_key_by_keychain_index(index)?)
    }

    // ============================================================
    // 持续监听
    // ============================================================

    /// 订阅 Key 的值变化
    ///
    /// 同一 Key 只有第一个监听者会触发 `StartListening` 事件。
    /// `fetch_cached_first` 为 true 时先阻塞读取一次缓存值，成功则立即推送给本监听者。
    ///
    /// # 错误
    ///
    /// - `DriverError::AccessDenied`: Key 不可读
    /// - `DriverError::Bridge`: 订阅事件发送失败（监听者被移除）
    pub fn start_listening<F>(
        &self,
        key: Key,
        id: impl Into<ListenerId>,
        callback: F,
        fetch_cached_first: bool,
    ) -> Result<(), DriverError>
    where
        F: Fn(&KeyResult) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        self.check_access(key, AccessType::READ)?;

        let id = id.into();
        let callback: ListenerCallback = Arc::new(callback);
        let wire_id = key.wire_id();

        {
            let _subscriptions = self.subscriptions.lock();
            // 与 teardown 互斥：拆除后不再登记监听者
            self.ensure_running()?;
            if self.callbacks.add_listener(wire_id, id.clone(), callback.clone()) {
                let code = EventCode::new(EventType::StartListening, wire_id).code();
                if let Err(e) = self.send(|bridge| bridge.send_event(code, &[], 0)) {
                    self.callbacks.remove_listener(wire_id, &id);
                    return Err(e);
                }
                debug!("Started listening on {}", key.name());
            }
        }

        if fetch_cached_first {
            match self.get_available_value(key) {
                Ok(result) if result.succeeded() => {
                    if catch_unwind(AssertUnwindSafe(|| callback(&result))).is_err() {
                        error!("Listener {} panicked on cached value", id);
                        DriverMetrics::incr(&self.metrics.callback_panics);
                    }
                },
                Ok(result) => debug!(
                    "No cached value for {}: {}",
                    key.name(),
                    result.error_description
                ),
                Err(e) => debug!("Cached value fetch for {} failed: {}", key.name(), e),
            }
        }
        Ok(())
    }

    /// 退订某个监听者在该 Key 上的订阅
    ///
    /// 最后一个监听者退订时发送 `StopListening`。
    pub fn stop_listening(&self, key: Key, id: impl Into<ListenerId>) -> Result<(), DriverError> {
        self.ensure_running()?;
        let id = id.into();
        let _subscriptions = self.subscriptions.lock();
        if self.callbacks.remove_listener(key.wire_id(), &id) {
            self.send_stop_listening(key.wire_id())?;
            debug!("Stopped listening on {}", key.name());
        }
        Ok(())
    }

    /// 退订该监听者的所有订阅
    ///
    /// 对每个失去最后监听者的 Key 都尝试发送 `StopListening`，返回第一个发送错误。
    pub fn stop_listening_all(&self, id: impl Into<ListenerId>) -> Result<(), DriverError> {
        self.ensure_running()?;
        let id = id.into();
        let mut first_error = None;
        let _subscriptions = self.subscriptions.lock();
        for wire_id in self.callbacks.remove_listener_everywhere(&id) {
            if let Err(e) = self.send_stop_listening(wire_id) {
                warn!("StopListening for 0x{:08X} failed: {}", wire_id, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ============================================================
    // 原始事件钩子
    // ============================================================

    /// 为任意事件类型注册原始事件处理器
    ///
    /// 该类型尚未向传输层注册入站回调时会先注册。
    pub fn register_event_handler(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), DriverError> {
        self.ensure_running()?;
        self.router.add_handler(event_type, handler);
        self.register_sink(event_type)
    }

    // ============================================================
    // 拆除
    // ============================================================

    /// 拆除控制器（幂等）
    ///
    /// 注销入站回调，丢弃所有未完成的单次回调（不调用），
    /// 为仍有监听者的 Key 发送 `StopListening`，清空监听者和钩子，停止分发线程。
    /// 之后的调用返回 `DriverError::TornDown`。
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let registered = std::mem::take(&mut *self.registered.lock());
        for event_type in registered {
            if let Err(e) = self.bridge.set_event_callback(event_type.base_code(), None) {
                debug!("Failed to unregister {} sink: {}", event_type, e);
            }
        }
        self.sink.lock().take();

        let discarded = {
            let _subscriptions = self.subscriptions.lock();
            let (discarded, subscribed) = self.callbacks.clear();
            for wire_id in subscribed {
                if let Err(e) = self.send_stop_listening(wire_id) {
                    debug!("StopListening for 0x{:08X} failed: {}", wire_id, e);
                }
            }
            discarded
        };
        self.router.clear_handlers();
        self.is_running.store(false, Ordering::Release);

        info!(
            "Command controller torn down ({} pending requests discarded)",
            discarded
        );
    }

    // ============================================================
    // 内部实现
    // ============================================================

    fn ensure_running(&self) -> Result<(), DriverError> {
        if self.is_torn_down() {
            Err(DriverError::TornDown)
        } else {
            Ok(())
        }
    }

    fn check_access(&self, key: Key, required: AccessType) -> Result<(), DriverError> {
        if key.allows(required) {
            Ok(())
        } else {
            warn!("{} does not allow {}", key.name(), required);
            Err(DriverError::AccessDenied {
                key: key.name(),
                required,
            })
        }
    }

    fn register_sink(&self, event_type: EventType) -> Result<(), DriverError> {
        let mut registered = self.registered.lock();
        if registered.contains(&event_type) {
            return Ok(());
        }
        let Some(sink) = self.sink.lock().clone() else {
            return Err(DriverError::TornDown);
        };
        self.bridge
            .set_event_callback(event_type.base_code(), Some(sink))?;
        registered.insert(event_type);
        trace!("Registered inbound sink for {}", event_type);
        Ok(())
    }

    /// 发送单次命令，返回使用的序列号（无回调时为 0）
    ///
    /// 回调在发送前登记，避免快速应答先于登记到达。
    fn request(
        &self,
        event_type: EventType,
        key: Key,
        payload: &[u8],
        callback: Option<ResultCallback>,
    ) -> Result<u64, DriverError> {
        let code = EventCode::new(event_type, key.wire_id()).code();

        let (pending, tag) = match callback {
            Some(callback) => {
                let kind = CallbackKind::for_event_type(event_type).ok_or_else(|| {
                    DriverError::InvalidInput(format!("{event_type} has no single-shot reply"))
                })?;
                let sequence = self.callbacks.next_sequence(kind);
                let tag = encode_tag(DataType::String, sequence)?;
                if self
                    .callbacks
                    .add_single_shot(kind, sequence, key.wire_id(), callback)
                    .is_some()
                {
                    warn!("{:?} sequence #{} reused, previous callback dropped", kind, sequence);
                }
                // teardown 可能在登记前清空了注册表，此时收回回调
                if self.is_torn_down() {
                    self.callbacks.take_single_shot(kind, sequence);
                    return Err(DriverError::TornDown);
                }
                (Some((kind, sequence)), tag)
            },
            None => (None, 0),
        };

        if let Err(e) = self.send(|bridge| bridge.send_event(code, payload, tag)) {
            if let Some((kind, sequence)) = pending {
                self.callbacks.take_single_shot(kind, sequence);
            }
            return Err(e);
        }

        trace!(
            "Sent {} {} tag=0x{:016X} ({} bytes)",
            event_type,
            key.name(),
            tag,
            payload.len()
        );
        Ok(pending.map_or(0, |(_, sequence)| sequence))
    }

    fn send_stop_listening(&self, wire_id: u32) -> Result<(), DriverError> {
        let code = EventCode::new(EventType::StopListening, wire_id).code();
        self.send(|bridge| bridge.send_event(code, &[], 0))
    }

    fn send<F>(&self, op: F) -> Result<(), DriverError>
    where
        F: FnOnce(&dyn Transport) -> Result<(), robomaster_bridge::BridgeError>,
    {
        match op(self.bridge.as_ref()) {
            Ok(()) => {
                DriverMetrics::incr(&self.metrics.events_sent);
                Ok(())
            },
            Err(e) => {
                DriverMetrics::incr(&self.metrics.send_failures);
                warn!("Transport send failed: {}", e);
                Err(e.into())
            },
        }
    }
}

impl Drop for CommandController {
    fn drop(&mut self) {
        self.teardown();

        // 最后一个引用在回调里释放时，分发线程会在本轮循环后自行退出
        if std::thread::current().id() == self.worker_id {
            return;
        }

        let join_timeout = Duration::from_secs(2);
        if let Some(handle) = self.worker.lock().take()
            && let Err(_e) = handle.join_timeout(join_timeout)
        {
            error!(
                "Dispatch thread panicked or failed to shut down within {:?}",
                join_timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ControllerBuilder;
    use crate::hooks::RawEvent;
    use crate::router::TIMEOUT_ERROR_CODE;
    use robomaster_bridge::{MockBridge, SentEvent, SentPayload};
    use robomaster_protocol::keys::{
        AIR_LINK_CONNECTION, GIMBAL_WORK_MODE, MAIN_CONTROLLER_VIRTUAL_STICK,
        ROBOMASTER_SYSTEM_FUNCTION_ENABLE,
    };
    use robomaster_protocol::{FunctionEnable, decode_tag, tag_sequence};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const WAIT: Duration = Duration::from_secs(2);

    /// 模拟引擎：对带标签的单次命令回复成功信封
    fn answering_mock(value: serde_json::Value) -> Arc<MockBridge> {
        let mock = Arc::new(MockBridge::new());
        mock.set_responder(Arc::new(move |event: &SentEvent| {
            let Ok(code) = event.code() else {
                return Vec::new();
            };
            if CallbackKind::for_event_type(code.event_type).is_none() || event.tag == 0 {
                return Vec::new();
            }
            let envelope = json!({
                "Tag": tag_sequence(event.tag),
                "Key": code.sub_type,
                "Error": 0,
                "Value": value,
            });
            vec![(event.event_code, envelope.to_string().into_bytes(), event.tag)]
        }));
        mock
    }

    fn controller(mock: &Arc<MockBridge>) -> CommandController {
        ControllerBuilder::new().build(mock.clone()).unwrap()
    }

    fn push(mock: &MockBridge, key: Key, value: serde_json::Value) {
        let envelope = json!({"Tag": 0, "Key": key.wire_id(), "Error": 0, "Value": value});
        let code = EventCode::new(EventType::StartListening, key.wire_id()).code();
        let tag = encode_tag(DataType::String, u64::from(key.wire_id())).unwrap();
        mock.inject(code, envelope.to_string().as_bytes(), tag);
    }

    fn events_of(mock: &MockBridge, event_type: EventType) -> Vec<SentEvent> {
        mock.sent()
            .into_iter()
            .filter(|e| e.code().map(|c| c.event_type) == Ok(event_type))
            .collect()
    }

    #[test]
    fn test_get_value_round_trip() {
        let mock = answering_mock(json!(true));
        let controller = controller(&mock);
        let (tx, rx) = crossbeam_channel::bounded(1);

        controller
            .get_value(AIR_LINK_CONNECTION, move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_code, (1u64 << 32) | 117440513);
        assert_eq!(decode_tag(sent[0].tag).unwrap(), (DataType::String, 1));

        let result = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(result.key, Some(AIR_LINK_CONNECTION));
        assert_eq!(result.value_bool(), Some(true));
        assert_eq!(result.error_code, 0);
        assert_eq!(controller.pending_requests(), 0);
    }

    #[test]
    fn test_access_denied_sends_nothing() {
        let mock = Arc::new(MockBridge::new());
        let controller = controller(&mock);

        let err = controller
            .set_value(AIR_LINK_CONNECTION, &true, None)
            .unwrap_err();
        assert!(matches!(err, DriverError::AccessDenied { key: "AirLinkConnection", .. }));

        let err = controller.direct_send(GIMBAL_WORK_MODE, 1).unwrap_err();
        assert!(matches!(err, DriverError::AccessDenied { .. }));

        let err = controller
            .get_value(ROBOMASTER_SYSTEM_FUNCTION_ENABLE, |_| {})
            .unwrap_err();
        assert!(matches!(err, DriverError::AccessDenied { .. }));

        assert!(mock.sent().is_empty());
        assert_eq!(controller.pending_requests(), 0);
    }

    #[test]
    fn test_set_without_callback_uses_zero_tag() {
        let mock = answering_mock(json!(null));
        let controller = controller(&mock);

        let enable = FunctionEnable::new().set(2, true);
        controller
            .set_value(ROBOMASTER_SYSTEM_FUNCTION_ENABLE, &enable, None)
            .unwrap();

        let sent = mock.sent();
        assert_eq!(sent[0].tag, 0);
        let payload: serde_json::Value =
            serde_json::from_str(&sent[0].text().unwrap()).unwrap();
        assert_eq!(payload["Value"]["list"][0]["id"], json!(2));
        assert_eq!(controller.pending_requests(), 0);
    }

    #[test]
    fn test_sequences_are_per_kind() {
        let mock = Arc::new(MockBridge::new());
        let controller = controller(&mock);

        controller.get_value(AIR_LINK_CONNECTION, |_| {}).unwrap();
        controller.get_value(AIR_LINK_CONNECTION, |_| {}).unwrap();
        controller
            .set_value(GIMBAL_WORK_MODE, &1, Some(Box::new(|_| {})))
            .unwrap();

        let tags: Vec<u64> = mock.sent().iter().map(|e| tag_sequence(e.tag)).collect();
        assert_eq!(tags, vec![1, 2, 1]);
        assert_eq!(controller.pending_requests(), 3);
    }

    #[test]
    fn test_send_failure_removes_callback() {
        let mock = Arc::new(MockBridge::new());
        let controller = controller(&mock);
        mock.set_fail_sends(true);

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = invoked.clone();
        let err = controller
            .get_value(AIR_LINK_CONNECTION, move |_| {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();

        assert!(err.is_transport_fault());
        assert_eq!(controller.pending_requests(), 0);
        assert_eq!(controller.metrics().snapshot().send_failures, 1);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listeners_share_one_subscription() {
        let mock = Arc::new(MockBridge::new());
        let controller = controller(&mock);
        let (tx, rx) = crossbeam_channel::unbounded();

        for id in ["l1", "l2"] {
            let tx = tx.clone();
            controller
                .start_listening(
                    AIR_LINK_CONNECTION,
                    id,
                    move |result: &KeyResult| {
                        let _ = tx.send((id, result.value_bool()));
                    },
                    false,
                )
                .unwrap();
        }
        assert_eq!(events_of(&mock, EventType::StartListening).len(), 1);
        assert_eq!(controller.listener_count(AIR_LINK_CONNECTION), 2);

        push(&mock, AIR_LINK_CONNECTION, json!(true));
        let mut seen = vec![rx.recv_timeout(WAIT).unwrap(), rx.recv_timeout(WAIT).unwrap()];
        seen.sort();
        assert_eq!(seen, vec![("l1", Some(true)), ("l2", Some(true))]);

        controller.stop_listening(AIR_LINK_CONNECTION, "l1").unwrap();
        assert!(events_of(&mock, EventType::StopListening).is_empty());
        controller.stop_listening(AIR_LINK_CONNECTION, "l2").unwrap();
        assert_eq!(events_of(&mock, EventType::StopListening).len(), 1);
    }

    #[test]
    fn test_stop_listening_all() {
        let mock = Arc::new(MockBridge::new());
        let controller = controller(&mock);

        controller
            .start_listening(AIR_LINK_CONNECTION, "ui", |_: &KeyResult| {}, false)
            .unwrap();
        controller
            .start_listening(GIMBAL_WORK_MODE, "ui", |_: &KeyResult| {}, false)
            .unwrap();
        controller
            .start_listening(GIMBAL_WORK_MODE, "log", |_: &KeyResult| {}, false)
            .unwrap();

        controller.stop_listening_all("ui").unwrap();
        let stops = events_of(&mock, EventType::StopListening);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].code().unwrap().sub_type, AIR_LINK_CONNECTION.wire_id());
        assert_eq!(controller.listener_count(GIMBAL_WORK_MODE), 1);
    }

    #[test]
    fn test_fetch_cached_first_delivers_value() {
        let mock = answering_mock(json!(false));
        let controller = controller(&mock);
        let (tx, rx) = crossbeam_channel::unbounded();

        controller
            .start_listening(
                AIR_LINK_CONNECTION,
                "boot",
                move |result: &KeyResult| {
                    let _ = tx.send(result.value_bool());
                },
                true,
            )
            .unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some(false));
        assert_eq!(events_of(&mock, EventType::GetAvailableValue).len(), 1);
    }

    #[test]
    fn test_get_available_value_times_out() {
        let mock = Arc::new(MockBridge::new());
        let controller = ControllerBuilder::new()
            .cached_value_timeout(Duration::from_millis(30))
            .build(mock.clone())
            .unwrap();

        let err = controller
            .get_available_value(AIR_LINK_CONNECTION)
            .unwrap_err();
        assert!(matches!(err, DriverError::Timeout));
        assert_eq!(controller.pending_requests(), 0);
    }

    #[test]
    fn test_blocking_call_from_dispatch_thread_rejected() {
        let mock = answering_mock(json!(true));
        let controller = Arc::new(controller(&mock));
        let (tx, rx) = crossbeam_channel::bounded(1);

        let inner = controller.clone();
        controller
            .get_value(AIR_LINK_CONNECTION, move |_| {
                let _ = tx.send(inner.get_available_value(AIR_LINK_CONNECTION));
            })
            .unwrap();

        let outcome = rx.recv_timeout(WAIT).unwrap();
        assert!(matches!(outcome, Err(DriverError::InvalidInput(_))));
    }

    #[test]
    fn test_perform_action_and_direct_send() {
        let mock = answering_mock(json!(0));
        let controller = controller(&mock);
        let (tx, rx) = crossbeam_channel::bounded(1);

        controller
            .perform_action(
                robomaster_protocol::keys::GIMBAL_ANGLE_INCREMENT_ROTATION,
                Some(json!({"pitch": 10, "yaw": -5, "time": 1000})),
                Some(Box::new(move |result| {
                    let _ = tx.send(result.error_code);
                })),
            )
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 0);

        controller
            .direct_send(MAIN_CONTROLLER_VIRTUAL_STICK, 0x1234)
            .unwrap();
        let last = mock.sent().pop().unwrap();
        assert_eq!(last.payload, SentPayload::Number(0x1234));
        assert_eq!(last.tag, 0);
        assert_eq!(
            last.code().unwrap(),
            EventCode::new(EventType::PerformAction, MAIN_CONTROLLER_VIRTUAL_STICK.wire_id())
        );
    }

    #[test]
    fn test_request_timeout_reports_failure() {
        let mock = Arc::new(MockBridge::new());
        let controller = ControllerBuilder::new()
            .request_timeout(Some(Duration::from_millis(20)))
            .sweep_interval(Duration::from_millis(5))
            .build(mock.clone())
            .unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        controller
            .get_value(AIR_LINK_CONNECTION, move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

        let result = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(result.error_code, TIMEOUT_ERROR_CODE);
        assert_eq!(result.error_description, "request timed out");
    }

    #[test]
    fn test_teardown_drops_pending_and_unsubscribes() {
        let mock = Arc::new(MockBridge::new());
        let controller = controller(&mock);
        let invoked = Arc::new(AtomicUsize::new(0));

        let invoked_clone = invoked.clone();
        controller
            .get_value(AIR_LINK_CONNECTION, move |_| {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        controller
            .start_listening(AIR_LINK_CONNECTION, "x", |_: &KeyResult| {}, false)
            .unwrap();
        assert!(mock.has_sink(EventType::GetValue.base_code()));

        controller.teardown();
        controller.teardown();

        assert!(controller.is_torn_down());
        assert!(mock.registered_types().is_empty());
        assert_eq!(events_of(&mock, EventType::StopListening).len(), 1);
        assert_eq!(controller.pending_requests(), 0);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        assert!(matches!(
            controller.get_value(AIR_LINK_CONNECTION, |_| {}),
            Err(DriverError::TornDown)
        ));
    }

    #[test]
    fn test_event_handler_registration() {
        let mock = Arc::new(MockBridge::new());
        let controller = controller(&mock);
        let (tx, rx) = crossbeam_channel::bounded(1);

        controller
            .register_event_handler(
                EventType::PrintLog,
                Arc::new(move |event: &RawEvent<'_>| {
                    let _ = tx.send(String::from_utf8_lossy(event.data).into_owned());
                }),
            )
            .unwrap();
        assert!(mock.has_sink(EventType::PrintLog.base_code()));

        mock.inject(EventType::PrintLog.base_code(), b"hello", 0);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "hello");
    }

    #[test]
    fn test_security_key() {
        let mock = Arc::new(MockBridge::new());
        mock.set_security_key(1, "k1");
        let controller = controller(&mock);
        assert_eq!(controller.security_key(1).unwrap(), "k1");
    }

    #[test]
    fn test_failed_subscribe_lets_next_listener_resubscribe() {
        let mock = Arc::new(MockBridge::new());
        let controller = controller(&mock);

        mock.set_fail_sends(true);
        assert!(
            controller
                .start_listening(AIR_LINK_CONNECTION, "a", |_: &KeyResult| {}, false)
                .is_err()
        );
        assert_eq!(controller.listener_count(AIR_LINK_CONNECTION), 0);

        mock.set_fail_sends(false);
        controller
            .start_listening(AIR_LINK_CONNECTION, "b", |_: &KeyResult| {}, false)
            .unwrap();
        assert_eq!(controller.listener_count(AIR_LINK_CONNECTION), 1);
        assert_eq!(events_of(&mock, EventType::StartListening).len(), 1);
    }

    #[test]
    fn test_concurrent_subscriptions_alternate_on_wire() {
        let mock = Arc::new(MockBridge::new());
        let controller = Arc::new(controller(&mock));

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let controller = controller.clone();
                std::thread::spawn(move || {
                    let id = format!("worker-{worker}");
                    for _ in 0..50 {
                        controller
                            .start_listening(
                                GIMBAL_WORK_MODE,
                                id.as_str(),
                                |_: &KeyResult| {},
                                false,
                            )
                            .unwrap();
                        controller
                            .stop_listening(GIMBAL_WORK_MODE, id.as_str())
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        // 发送与引用计数变化串行：线上必须是 Start/Stop 严格交替
        let wire: Vec<EventType> = mock
            .sent()
            .iter()
            .filter_map(|e| e.code().ok().map(|c| c.event_type))
            .filter(|t| matches!(t, EventType::StartListening | EventType::StopListening))
            .collect();
        assert!(!wire.is_empty());
        for (i, event_type) in wire.iter().enumerate() {
            let expected = if i % 2 == 0 {
                EventType::StartListening
            } else {
                EventType::StopListening
            };
            assert_eq!(*event_type, expected, "wire order broken at #{i}");
        }
        assert_eq!(controller.listener_count(GIMBAL_WORK_MODE), 0);
    }

    #[test]
    fn test_requests_racing_teardown_leave_nothing_pending() {
        for _ in 0..20 {
            let mock = Arc::new(MockBridge::new());
            let controller = Arc::new(controller(&mock));

            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let controller = controller.clone();
                    std::thread::spawn(move || {
                        while controller
                            .get_value(AIR_LINK_CONNECTION, |_: KeyResult| {})
                            .is_ok()
                        {}
                    })
                })
                .collect();

            std::thread::sleep(Duration::from_millis(2));
            controller.teardown();
            for worker in workers {
                worker.join().unwrap();
            }
            assert_eq!(controller.pending_requests(), 0);
        }
    }
}
