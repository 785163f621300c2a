//! 钩子系统（Hook System）
//!
//! 按事件类型注册原始事件处理器，用于 Key 命令之外的事件类别
//! （打印日志、视频流、原生功能等）。处理器在分发线程上被调用，
//! 在 Key 命令的路由之前执行。
//!
//! # 使用示例
//!
//! ```rust
//! use robomaster_driver::hooks::{HookManager, RawEvent};
//! use robomaster_protocol::{EventCode, EventType};
//! use std::sync::Arc;
//!
//! let mut hooks = HookManager::new();
//! hooks.add_handler(
//!     EventType::PrintLog,
//!     Arc::new(|event: &RawEvent<'_>| {
//!         println!("engine log: {}", String::from_utf8_lossy(event.data));
//!     }),
//! );
//!
//! let event = RawEvent {
//!     code: EventCode::new(EventType::PrintLog, 0),
//!     data: b"hello",
//!     tag: 0,
//! };
//! assert_eq!(hooks.trigger(&event), 1);
//! ```

use robomaster_protocol::{EventCode, EventType};
use std::collections::HashMap;
use std::sync::Arc;

/// 未经解码的入站事件
#[derive(Debug, Clone, Copy)]
pub struct RawEvent<'a> {
    pub code: EventCode,
    pub data: &'a [u8],
    pub tag: u64,
}

/// 原始事件处理器
///
/// # 性能要求
///
/// 处理器在分发线程上同步执行，耗时会推迟之后所有事件的路由。
/// 重活请用 `crossbeam_channel::Sender::try_send` 转交给其他线程。
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &RawEvent<'_>);
}

impl<F> EventHandler for F
where
    F: Fn(&RawEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &RawEvent<'_>) {
        self(event)
    }
}

/// 钩子管理器
///
/// 本身不是线程安全的；控制器把它放在 `ArcSwap` 中，
/// 注册时复制一份再整体替换，分发线程读取时无锁。
#[derive(Default, Clone)]
pub struct HookManager {
    handlers: HashMap<EventType, Vec<Arc<dyn EventHandler>>>,
}

impl HookManager {
    /// 创建新的钩子管理器
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加处理器
    ///
    /// # 参数
    ///
    /// - `event_type`: 关注的事件类型
    /// - `handler`: 处理器
    pub fn add_handler(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type).or_default().push(handler);
    }

    /// 移除某一事件类型的所有处理器，返回移除数量
    pub fn remove_handlers(&mut self, event_type: EventType) -> usize {
        self.handlers.remove(&event_type).map_or(0, |handlers| handlers.len())
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// 触发匹配事件类型的处理器，返回被调用的数量
    pub fn trigger(&self, event: &RawEvent<'_>) -> usize {
        let Some(handlers) = self.handlers.get(&event.code.event_type) else {
            return 0;
        };
        for handler in handlers {
            handler.on_event(event);
        }
        handlers.len()
    }

    /// 某一事件类型的处理器（用于在锁外逐个调用）
    pub fn handlers(&self, event_type: EventType) -> &[Arc<dyn EventHandler>] {
        self.handlers.get(&event_type).map_or(&[], Vec::as_slice)
    }

    /// 有处理器的事件类型（升序）
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// 处理器总数
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl EventHandler for Counter {
        fn on_event(&self, _event: &RawEvent<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(event_type: EventType) -> RawEvent<'static> {
        RawEvent {
            code: EventCode::new(event_type, 0),
            data: b"",
            tag: 0,
        }
    }

    #[test]
    fn test_trigger_matches_event_type() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut hooks = HookManager::new();
        hooks.add_handler(EventType::VideoDataRecv, counter.clone());
        hooks.add_handler(EventType::VideoDataRecv, counter.clone());

        assert_eq!(hooks.trigger(&event(EventType::VideoDataRecv)), 2);
        assert_eq!(hooks.trigger(&event(EventType::PrintLog)), 0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut hooks = HookManager::new();
        assert!(hooks.is_empty());
        hooks.add_handler(EventType::PrintLog, Arc::new(|_: &RawEvent<'_>| {}));
        hooks.add_handler(EventType::Connection, Arc::new(|_: &RawEvent<'_>| {}));
        assert_eq!(
            hooks.event_types(),
            vec![EventType::Connection, EventType::PrintLog]
        );

        assert_eq!(hooks.remove_handlers(EventType::PrintLog), 1);
        assert_eq!(hooks.handlers(EventType::PrintLog).len(), 0);

        hooks.clear();
        assert!(hooks.is_empty());
    }
}
