//! 回调注册表
//!
//! 两张表共用一把锁：
//!
//! - **单次回调表**：`(种类, 序列号) -> 回调`，每个回调至多被取出一次
//! - **监听者表**：`wire id -> {监听者 ID -> 回调}`
//!
//! 取出回调后立即释放锁，调用方在锁外执行回调。

use parking_lot::Mutex;
use robomaster_protocol::{EventType, KeyResult, MAX_SEQUENCE};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 单次结果回调
pub type ResultCallback = Box<dyn FnOnce(KeyResult) + Send + 'static>;

/// 监听推送回调
pub type ListenerCallback = Arc<dyn Fn(&KeyResult) + Send + Sync + 'static>;

/// 单次回调种类
///
/// 每个种类有独立的序列号计数器，同一序列号在不同种类间不会混淆。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Getter,
    Setter,
    Action,
    AvailableValue,
}

impl CallbackKind {
    pub const ALL: [CallbackKind; 4] = [
        CallbackKind::Getter,
        CallbackKind::Setter,
        CallbackKind::Action,
        CallbackKind::AvailableValue,
    ];

    /// 事件类型对应的回调种类（非单次命令返回 `None`）
    pub fn for_event_type(event_type: EventType) -> Option<CallbackKind> {
        match event_type {
            EventType::GetValue => Some(CallbackKind::Getter),
            EventType::SetValue => Some(CallbackKind::Setter),
            EventType::PerformAction => Some(CallbackKind::Action),
            EventType::GetAvailableValue => Some(CallbackKind::AvailableValue),
            _ => None,
        }
    }

    const fn index(self) -> usize {
        match self {
            CallbackKind::Getter => 0,
            CallbackKind::Setter => 1,
            CallbackKind::Action => 2,
            CallbackKind::AvailableValue => 3,
        }
    }
}

/// 监听者标识
///
/// 同一监听者可以订阅多个 Key，之后用同一个 ID 一次性退订。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(String);

impl ListenerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ListenerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ListenerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct PendingRequest {
    callback: ResultCallback,
    wire_id: u32,
    created_at: Instant,
}

/// 已过期的单次请求
pub struct ExpiredRequest {
    pub kind: CallbackKind,
    pub sequence: u64,
    pub wire_id: u32,
    pub callback: ResultCallback,
}

#[derive(Default)]
struct Tables {
    pending: HashMap<(CallbackKind, u64), PendingRequest>,
    listeners: HashMap<u32, HashMap<ListenerId, ListenerCallback>>,
}

/// 回调注册表
pub struct CallbackRegistry {
    tables: Mutex<Tables>,
    sequences: [AtomicU64; 4],
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            sequences: [
                AtomicU64::new(1),
                AtomicU64::new(1),
                AtomicU64::new(1),
                AtomicU64::new(1),
            ],
        }
    }

    /// 分配下一个序列号
    ///
    /// 每个种类从 1 开始递增；超过 56 位后回绕并跳过 0（0 表示"无回调"）。
    pub fn next_sequence(&self, kind: CallbackKind) -> u64 {
        let counter = &self.sequences[kind.index()];
        loop {
            let sequence = counter.fetch_add(1, Ordering::Relaxed) & MAX_SEQUENCE;
            if sequence != 0 {
                return sequence;
            }
        }
    }

    /// 登记单次回调
    ///
    /// 若该序列号已有未完成的回调（计数器回绕后才可能发生），旧回调被返回给调用方。
    pub fn add_single_shot(
        &self,
        kind: CallbackKind,
        sequence: u64,
        wire_id: u32,
        callback: ResultCallback,
    ) -> Option<ResultCallback> {
        let request = PendingRequest {
            callback,
            wire_id,
            created_at: Instant::now(),
        };
        self.tables
            .lock()
            .pending
            .insert((kind, sequence), request)
            .map(|displaced| displaced.callback)
    }

    /// 取出单次回调（至多成功一次）
    pub fn take_single_shot(&self, kind: CallbackKind, sequence: u64) -> Option<ResultCallback> {
        self.tables
            .lock()
            .pending
            .remove(&(kind, sequence))
            .map(|request| request.callback)
    }

    pub fn has_single_shot(&self, kind: CallbackKind, sequence: u64) -> bool {
        self.tables.lock().pending.contains_key(&(kind, sequence))
    }

    /// 未完成的单次回调数
    pub fn pending_count(&self) -> usize {
        self.tables.lock().pending.len()
    }

    /// 取出所有登记时间早于 `timeout` 的单次回调
    pub fn expire_older_than(&self, timeout: Duration) -> Vec<ExpiredRequest> {
        let now = Instant::now();
        let mut tables = self.tables.lock();
        let expired_keys: Vec<(CallbackKind, u64)> = tables
            .pending
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.created_at) >= timeout)
            .map(|(key, _)| *key)
            .collect();

        let mut expired: Vec<ExpiredRequest> = expired_keys
            .into_iter()
            .filter_map(|(kind, sequence)| {
                tables
                    .pending
                    .remove(&(kind, sequence))
                    .map(|request| ExpiredRequest {
                        kind,
                        sequence,
                        wire_id: request.wire_id,
                        callback: request.callback,
                    })
            })
            .collect();
        expired.sort_by_key(|request| request.sequence);
        expired
    }

    // ============================================================
    // 监听者
    // ============================================================

    /// 添加监听者，返回这是否为该 Key 的第一个监听者
    ///
    /// 同一 ID 重复添加会替换旧回调。
    pub fn add_listener(&self, wire_id: u32, id: ListenerId, callback: ListenerCallback) -> bool {
        let mut tables = self.tables.lock();
        let listeners = tables.listeners.entry(wire_id).or_default();
        let first = listeners.is_empty();
        listeners.insert(id, callback);
        first
    }

    /// 移除监听者，返回该 Key 是否因此失去最后一个监听者
    pub fn remove_listener(&self, wire_id: u32, id: &ListenerId) -> bool {
        let mut tables = self.tables.lock();
        let Some(listeners) = tables.listeners.get_mut(&wire_id) else {
            return false;
        };
        if listeners.remove(id).is_none() {
            return false;
        }
        if listeners.is_empty() {
            tables.listeners.remove(&wire_id);
            true
        } else {
            false
        }
    }

    /// 从所有 Key 移除该监听者，返回失去最后一个监听者的 Key（升序）
    pub fn remove_listener_everywhere(&self, id: &ListenerId) -> Vec<u32> {
        let mut tables = self.tables.lock();
        let mut emptied = Vec::new();
        tables.listeners.retain(|wire_id, listeners| {
            if listeners.remove(id).is_some() && listeners.is_empty() {
                emptied.push(*wire_id);
                false
            } else {
                true
            }
        });
        emptied.sort_unstable();
        emptied
    }

    /// 该 Key 当前监听者的快照
    pub fn listeners(&self, wire_id: u32) -> SmallVec<[ListenerCallback; 4]> {
        self.tables
            .lock()
            .listeners
            .get(&wire_id)
            .map(|listeners| listeners.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, wire_id: u32) -> usize {
        self.tables
            .lock()
            .listeners
            .get(&wire_id)
            .map_or(0, HashMap::len)
    }

    /// 当前有监听者的 Key（升序）
    pub fn subscribed_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.tables.lock().listeners.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// 清空两张表
    ///
    /// 返回被丢弃的单次回调数和清空前有监听者的 Key。
    /// 回调在锁外析构，不会被调用。
    pub fn clear(&self) -> (usize, Vec<u32>) {
        let (pending, listeners) = {
            let mut tables = self.tables.lock();
            (
                std::mem::take(&mut tables.pending),
                std::mem::take(&mut tables.listeners),
            )
        };
        let mut subscribed: Vec<u32> = listeners.keys().copied().collect();
        subscribed.sort_unstable();
        (pending.len(), subscribed)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};

    #[derive(Debug, Clone)]
    enum Op {
        Add(u32, u8),
        Remove(u32, u8),
        RemoveEverywhere(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..4, 0u8..3).prop_map(|(k, id)| Op::Add(k, id)),
            (0u32..4, 0u8..3).prop_map(|(k, id)| Op::Remove(k, id)),
            (0u8..3).prop_map(Op::RemoveEverywhere),
        ]
    }

    proptest! {
        /// 首个监听者 / 最后一个监听者的判定与引用计数模型一致
        #[test]
        fn listener_transitions_match_model(ops in proptest::collection::vec(op(), 0..64)) {
            let registry = CallbackRegistry::new();
            let mut model: BTreeMap<u32, BTreeSet<u8>> = BTreeMap::new();
            let listener: ListenerCallback = Arc::new(|_: &KeyResult| {});

            for op in ops {
                match op {
                    Op::Add(key, id) => {
                        let expected_first = model.get(&key).is_none_or(BTreeSet::is_empty);
                        model.entry(key).or_default().insert(id);
                        let first = registry.add_listener(key, ListenerId::new(id.to_string()), listener.clone());
                        prop_assert_eq!(first, expected_first);
                    },
                    Op::Remove(key, id) => {
                        let removed = model.get_mut(&key).is_some_and(|ids| ids.remove(&id));
                        let expected_last = removed && model.get(&key).is_some_and(BTreeSet::is_empty);
                        if expected_last {
                            model.remove(&key);
                        }
                        let last = registry.remove_listener(key, &ListenerId::new(id.to_string()));
                        prop_assert_eq!(last, expected_last);
                    },
                    Op::RemoveEverywhere(id) => {
                        let mut emptied = Vec::new();
                        model.retain(|key, ids| {
                            if ids.remove(&id) && ids.is_empty() {
                                emptied.push(*key);
                                false
                            } else {
                                true
                            }
                        });
                        let actual = registry.remove_listener_everywhere(&ListenerId::new(id.to_string()));
                        prop_assert_eq!(actual, emptied);
                    },
                }

                let keys: Vec<u32> = model.keys().copied().collect();
                prop_assert_eq!(registry.subscribed_keys(), keys);
            }
        }
    }
}
