//! 模拟设备传输
//!
//! 在进程内模拟引擎对 Key 命令的应答：
//! - GetValue / GetAvailableValue 返回当前缓存值
//! - SetValue 更新缓存值，并向已订阅的 Key 推送
//! - PerformAction 记录动作并应答成功
//! - Connection CONNECT 把 `AirLinkConnection` 置为 true
//!
//! 应答在独立的投递线程上回调，与真实引擎的线程模型一致。

use crate::{BridgeError, EventSink, SinkTable, Transport};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use robomaster_protocol::keys::AIR_LINK_CONNECTION;
use robomaster_protocol::{
    DataType, EventCode, EventType, KeyRegistry, connection, encode_tag, tag_sequence,
};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// 模拟设备应答未知 Key 时使用的错误码
pub const SIM_UNKNOWN_KEY_ERROR: i64 = 1;

struct Outbound {
    event_code: u64,
    data: Vec<u8>,
    tag: u64,
}

#[derive(Default)]
struct SimState {
    values: HashMap<u32, Value>,
    listening: HashSet<u32>,
    actions: Vec<(u32, Value)>,
    robot_ip: Option<String>,
    robot_port: Option<u64>,
    security_keys: HashMap<u64, String>,
}

/// 模拟设备
pub struct SimBridge {
    sinks: Arc<SinkTable>,
    state: Mutex<SimState>,
    outbox: Option<Sender<Outbound>>,
    worker: Option<JoinHandle<()>>,
    initialized: AtomicBool,
}

impl SimBridge {
    /// 创建模拟设备（启动投递线程）
    pub fn new() -> Result<Self, BridgeError> {
        let sinks = Arc::new(SinkTable::new());
        let (tx, rx) = crossbeam_channel::unbounded::<Outbound>();

        let sinks_clone = sinks.clone();
        let worker = thread::Builder::new()
            .name("bridge-sim".into())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    sinks_clone.dispatch(event.event_code, &event.data, event.tag);
                }
            })?;

        let mut state = SimState::default();
        state.values.insert(AIR_LINK_CONNECTION.wire_id(), json!(false));

        Ok(Self {
            sinks,
            state: Mutex::new(state),
            outbox: Some(tx),
            worker: Some(worker),
            initialized: AtomicBool::new(false),
        })
    }

    /// 设置 Key 的当前值（已订阅时推送）
    pub fn set_value(&self, wire_id: u32, value: Value) {
        let mut state = self.state.lock();
        state.values.insert(wire_id, value);
        self.push_if_listening(&state, wire_id);
    }

    pub fn value(&self, wire_id: u32) -> Option<Value> {
        self.state.lock().values.get(&wire_id).cloned()
    }

    /// 已执行的动作 `(wire id, 参数)`
    pub fn actions(&self) -> Vec<(u32, Value)> {
        self.state.lock().actions.clone()
    }

    pub fn is_listening(&self, wire_id: u32) -> bool {
        self.state.lock().listening.contains(&wire_id)
    }

    /// 最近一次 Connection 设置的 `(IP, 端口)`
    pub fn connection_target(&self) -> (Option<String>, Option<u64>) {
        let state = self.state.lock();
        (state.robot_ip.clone(), state.robot_port)
    }

    pub fn set_security_key(&self, index: u64, key: impl Into<String>) {
        self.state.lock().security_keys.insert(index, key.into());
    }

    fn post(&self, event_code: u64, data: Vec<u8>, tag: u64) {
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(Outbound {
                event_code,
                data,
                tag,
            });
        }
    }

    fn reply(&self, event_type: EventType, wire_id: u32, sequence: u64, error: i64, value: &Value) {
        if sequence == 0 {
            return;
        }
        let Ok(tag) = encode_tag(DataType::String, sequence) else {
            return;
        };
        let envelope = json!({
            "Tag": sequence,
            "Key": wire_id,
            "Error": error,
            "Value": value,
        });
        self.post(
            EventCode::new(event_type, wire_id).code(),
            envelope.to_string().into_bytes(),
            tag,
        );
    }

    fn push_if_listening(&self, state: &SimState, wire_id: u32) {
        if !state.listening.contains(&wire_id) {
            return;
        }
        let Some(value) = state.values.get(&wire_id) else {
            return;
        };
        let Ok(tag) = encode_tag(DataType::String, u64::from(wire_id)) else {
            return;
        };
        let envelope = json!({
            "Tag": 0,
            "Key": wire_id,
            "Error": 0,
            "Value": value,
        });
        self.post(
            EventCode::new(EventType::StartListening, wire_id).code(),
            envelope.to_string().into_bytes(),
            tag,
        );
    }

    fn handle(&self, event_code: u64, value: Option<Value>, tag: u64) {
        let code = match EventCode::decode(event_code) {
            Ok(code) => code,
            Err(e) => {
                warn!("Simulator ignoring event 0x{:016X}: {}", event_code, e);
                return;
            },
        };
        let wire_id = code.sub_type;
        let sequence = tag_sequence(tag);
        let mut state = self.state.lock();

        match code.event_type {
            EventType::GetValue | EventType::GetAvailableValue => {
                match state.values.get(&wire_id) {
                    Some(current) => self.reply(code.event_type, wire_id, sequence, 0, current),
                    None => self.reply(
                        code.event_type,
                        wire_id,
                        sequence,
                        SIM_UNKNOWN_KEY_ERROR,
                        &Value::Null,
                    ),
                }
            },
            EventType::SetValue => {
                let value = value.unwrap_or(Value::Null);
                let known = KeyRegistry::builtin().by_wire_id(wire_id).is_ok()
                    || state.values.contains_key(&wire_id);
                if !known {
                    self.reply(code.event_type, wire_id, sequence, SIM_UNKNOWN_KEY_ERROR, &value);
                    return;
                }
                state.values.insert(wire_id, value.clone());
                self.reply(code.event_type, wire_id, sequence, 0, &value);
                self.push_if_listening(&state, wire_id);
            },
            EventType::PerformAction => {
                let value = value.unwrap_or(Value::Bool(true));
                state.actions.push((wire_id, value.clone()));
                self.reply(code.event_type, wire_id, sequence, 0, &value);
            },
            EventType::StartListening => {
                state.listening.insert(wire_id);
                self.push_if_listening(&state, wire_id);
            },
            EventType::StopListening => {
                state.listening.remove(&wire_id);
            },
            EventType::Connection => match wire_id {
                connection::CONNECT => {
                    debug!("Simulator link up ({:?})", state.robot_ip);
                    state
                        .values
                        .insert(AIR_LINK_CONNECTION.wire_id(), Value::Bool(true));
                    self.push_if_listening(&state, AIR_LINK_CONNECTION.wire_id());
                },
                connection::RESET => {
                    state
                        .values
                        .insert(AIR_LINK_CONNECTION.wire_id(), Value::Bool(false));
                    self.push_if_listening(&state, AIR_LINK_CONNECTION.wire_id());
                },
                connection::SET_IP => {
                    state.robot_ip = value.and_then(|v| v.as_str().map(str::to_string));
                },
                connection::SET_PORT => {
                    state.robot_port = value.and_then(|v| v.as_u64());
                },
                other => trace!("Simulator ignoring connection sub-type {}", other),
            },
            other => trace!("Simulator ignoring {} event", other),
        }
    }
}

/// 从 `{"Value": v}` 取出参数值；非 JSON 文本按字符串值处理
fn parse_value(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut map)) => map.remove("Value"),
        Ok(other) => Some(other),
        Err(_) => Some(Value::String(text.to_string())),
    }
}

impl Transport for SimBridge {
    fn create(&self, name: &str, debuggable: bool, _log_path: &str) -> Result<(), BridgeError> {
        debug!("Simulator created: {} (debuggable: {})", name, debuggable);
        Ok(())
    }

    fn destroy(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    fn initialize(&self) -> Result<bool, BridgeError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn uninitialize(&self) -> Result<(), BridgeError> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn send_event(&self, event_code: u64, data: &[u8], tag: u64) -> Result<(), BridgeError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(BridgeError::NotInitialized);
        }
        let text = String::from_utf8_lossy(data);
        self.handle(event_code, parse_value(&text), tag);
        Ok(())
    }

    fn send_event_with_string(
        &self,
        event_code: u64,
        data: &str,
        tag: u64,
    ) -> Result<(), BridgeError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(BridgeError::NotInitialized);
        }
        self.handle(event_code, parse_value(data), tag);
        Ok(())
    }

    fn send_event_with_number(
        &self,
        event_code: u64,
        data: u64,
        tag: u64,
    ) -> Result<(), BridgeError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(BridgeError::NotInitialized);
        }
        self.handle(event_code, Some(Value::from(data)), tag);
        Ok(())
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
            .state
            .lock()
            .security_keys
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("sim-key-{index}")))
    }
}

impl Drop for SimBridge {
    fn drop(&mut self) {
        // 关闭投递通道，投递线程随之退出
        self.outbox.take();
        self.sinks.clear();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
