//! Mock 传输（用于测试，无引擎依赖）
//!
//! 记录每一次发送，并允许测试同步注入入站事件。

use crate::{BridgeError, EventSink, SinkTable, Transport};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use robomaster_protocol::{EventCode, ProtocolError};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 发送时携带的负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentPayload {
    Bytes(Vec<u8>),
    Text(String),
    Number(u64),
}

/// 一次记录下的发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEvent {
    pub event_code: u64,
    pub payload: SentPayload,
    pub tag: u64,
}

impl SentEvent {
    pub fn code(&self) -> Result<EventCode, ProtocolError> {
        EventCode::decode(self.event_code)
    }

    /// 字节或字符串负载按 UTF-8 解释
    pub fn text(&self) -> Option<String> {
        match &self.payload {
            SentPayload::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            SentPayload::Text(text) => Some(text.clone()),
            SentPayload::Number(_) => None,
        }
    }
}

/// 自动应答：根据发送内容返回要注入的 `(事件码, 负载, 标签)` 列表
pub type Responder = Arc<dyn Fn(&SentEvent) -> Vec<(u64, Vec<u8>, u64)> + Send + Sync>;

/// 记录型 Mock 传输
pub struct MockBridge {
    sinks: SinkTable,
    sent: Mutex<Vec<SentEvent>>,
    watchers: Mutex<Vec<Sender<SentEvent>>>,
    responder: Mutex<Option<Responder>>,
    created: Mutex<Option<(String, bool)>>,
    initialized: AtomicBool,
    initialize_result: AtomicBool,
    fail_sends: AtomicBool,
    security_keys: Mutex<HashMap<u64, String>>,
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            sinks: SinkTable::new(),
            sent: Mutex::new(Vec::new()),
            watchers: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            created: Mutex::new(None),
            initialized: AtomicBool::new(false),
            initialize_result: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            security_keys: Mutex::new(HashMap::new()),
        }
    }

    /// 所有已记录的发送（按时间顺序）
    pub fn sent(&self) -> Vec<SentEvent> {
        self.sent.lock().clone()
    }

    /// 取出并清空已记录的发送
    pub fn take_sent(&self) -> Vec<SentEvent> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// 订阅之后的每一次发送
    pub fn watch_sent(&self) -> Receiver<SentEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.watchers.lock().push(tx);
        rx
    }

    /// 设置自动应答
    pub fn set_responder(&self, responder: Responder) {
        *self.responder.lock() = Some(responder);
    }

    /// 同步注入入站事件，返回是否有回调接收
    pub fn inject(&self, event_code: u64, data: &[u8], tag: u64) -> bool {
        self.sinks.dispatch(event_code, data, tag)
    }

    pub fn has_sink(&self, event_code: u64) -> bool {
        self.sinks.is_registered(event_code)
    }

    pub fn registered_types(&self) -> Vec<u32> {
        self.sinks.registered_types()
    }

    pub fn created(&self) -> Option<(String, bool)> {
        self.created.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialize_result(&self, ok: bool) {
        self.initialize_result.store(ok, Ordering::SeqCst);
    }

    /// 让之后的发送返回 `BridgeError::Closed`
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_security_key(&self, index: u64, key: impl Into<String>) {
        self.security_keys.lock().insert(index, key.into());
    }

    fn record(&self, event: SentEvent) -> Result<(), BridgeError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }

        self.sent.lock().push(event.clone());
        self.watchers.lock().retain(|tx| tx.send(event.clone()).is_ok());

        let responder = self.responder.lock().clone();
        if let Some(responder) = responder {
            for (code, data, tag) in responder(&event) {
                self.inject(code, &data, tag);
            }
        }
        Ok(())
    }
}

impl Transport for MockBridge {
    fn create(&self, name: &str, debuggable: bool, _log_path: &str) -> Result<(), BridgeError> {
        *self.created.lock() = Some((name.to_string(), debuggable));
        Ok(())
    }

    fn destroy(&self) -> Result<(), BridgeError> {
        *self.created.lock() = None;
        Ok(())
    }

    fn initialize(&self) -> Result<bool, BridgeError> {
        let ok = self.initialize_result.load(Ordering::SeqCst);
        self.initialized.store(ok, Ordering::SeqCst);
        Ok(ok)
    }

    fn uninitialize(&self) -> Result<(), BridgeError> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn send_event(&self, event_code: u64, data: &[u8], tag: u64) -> Result<(), BridgeError> {
        self.record(SentEvent {
            event_code,
            payload: SentPayload::Bytes(data.to_vec()),
            tag,
        })
    }

    fn send_event_with_string(
        &self,
        event_code: u64,
        data: &str,
        tag: u64,
    ) -> Result<(), BridgeError> {
        self.record(SentEvent {
            event_code,
            payload: SentPayload::Text(data.to_string()),
            tag,
        })
    }

    fn send_event_with_number(
        &self,
        event_code: u64,
        data: u64,
        tag: u64,
    ) -> Result<(), BridgeError> {
        self.record(SentEvent {
            event_code,
            payload: SentPayload::Number(data),
            tag,
        })
    }

    fn set_event_callback(
        &self,
        event_code: u64,
        sink: Option<EventSink>,
    ) -> Result<(), BridgeError> {
        self.sinks.set(event_code, sink);
        Ok(())
    }

    fn get_security_key_by_keychain_index(&self, index: u64) -> Result<String, BridgeError> {
        Ok(self
            .security_keys
            .lock()
            .get(&index)
            .cloned()
            .unwrap_or_default())
    }
}
