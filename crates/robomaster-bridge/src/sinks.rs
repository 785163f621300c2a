//! 按事件类型索引的入站回调表

use crate::EventSink;
use parking_lot::RwLock;
use robomaster_protocol::split_event_code;
use std::collections::HashMap;

/// 入站回调表
///
/// 以事件码高 32 位（事件类型）为键。分发时先在读锁内克隆回调，
/// 释放锁后再调用，回调内部可以安全地修改本表。
#[derive(Default)]
pub struct SinkTable {
    sinks: RwLock<HashMap<u32, EventSink>>,
}

impl SinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或注销回调，返回该类型之前是否已注册
    pub fn set(&self, event_code: u64, sink: Option<EventSink>) -> bool {
        let (event_type, _) = split_event_code(event_code);
        let mut sinks = self.sinks.write();
        match sink {
            Some(sink) => sinks.insert(event_type, sink).is_some(),
            None => sinks.remove(&event_type).is_some(),
        }
    }

    pub fn is_registered(&self, event_code: u64) -> bool {
        let (event_type, _) = split_event_code(event_code);
        self.sinks.read().contains_key(&event_type)
    }

    /// 已注册的事件类型（升序）
    pub fn registered_types(&self) -> Vec<u32> {
        let mut types: Vec<u32> = self.sinks.read().keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// 分发入站事件，返回是否有回调接收
    pub fn dispatch(&self, event_code: u64, data: &[u8], tag: u64) -> bool {
        let (event_type, _) = split_event_code(event_code);
        let sink = self.sinks.read().get(&event_type).cloned();
        match sink {
            Some(sink) => {
                sink(event_code, data, tag);
                true
            },
            None => {
                tracing::trace!(
                    "No sink for event 0x{:016X} (type {}), dropped",
                    event_code,
                    event_type
                );
                false
            },
        }
    }

    pub fn clear(&self) {
        self.sinks.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_by_event_type() {
        let table = SinkTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        table.set(
            1u64 << 32,
            Some(Arc::new(move |code, data: &[u8], tag| {
                assert_eq!(code, (1u64 << 32) | 7);
                assert_eq!(data, b"x");
                assert_eq!(tag, 3);
                hits_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );

        // 子类型不影响匹配
        assert!(table.dispatch((1u64 << 32) | 7, b"x", 3));
        assert!(!table.dispatch(2u64 << 32, b"x", 3));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister() {
        let table = SinkTable::new();
        assert!(!table.set(4u64 << 32, Some(Arc::new(|_: u64, _: &[u8], _: u64| {}))));
        assert!(table.set(4u64 << 32, Some(Arc::new(|_: u64, _: &[u8], _: u64| {}))));
        assert_eq!(table.registered_types(), vec![4]);
        assert!(table.set(4u64 << 32, None));
        assert!(!table.is_registered(4u64 << 32));
    }
}
