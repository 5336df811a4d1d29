//! 进程内事件总线
//!
//! 适配层通过订阅生命周期事件观察核心，而核心不感知任何传输层。
//! 按事件类型注册处理器，另有通配订阅者列表；publish 同步派发，
//! 先精确类型再通配，均按注册顺序。单个处理器 panic 会被隔离，
//! 不影响后续处理器。

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::model::{MessageRecord, Person, Request, Task};

/// 事件类型键（订阅用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RequestCreated,
    RequestCompleted,
    TaskCreated,
    MessageSent,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RequestCreated => "request.created",
            EventKind::RequestCompleted => "request.completed",
            EventKind::TaskCreated => "task.created",
            EventKind::MessageSent => "message.sent",
        }
    }
}

/// 生命周期事件，携带完整记录与相关人员引用
#[derive(Debug, Clone)]
pub enum Event {
    /// 新请求已创建并分派
    RequestCreated {
        request: Request,
        task: Task,
        origin: Person,
        target: Person,
    },
    /// 请求已完成（响应已写入）
    RequestCompleted {
        request: Request,
        task: Option<Task>,
        responder: Person,
    },
    /// 接收方队列新增任务
    TaskCreated {
        task: Task,
        request: Request,
        owner: Person,
    },
    /// 发出了一条消息（目前只有跟进提醒走这里）
    MessageSent { message: MessageRecord },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RequestCreated { .. } => EventKind::RequestCreated,
            Event::RequestCompleted { .. } => EventKind::RequestCompleted,
            Event::TaskCreated { .. } => EventKind::TaskCreated,
            Event::MessageSent { .. } => EventKind::MessageSent,
        }
    }
}

/// 事件处理器
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// 事件总线
pub struct EventBus {
    by_kind: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
    wildcard: RwLock<Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            by_kind: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
        }
    }

    /// 订阅指定类型的事件
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut map = self.by_kind.write().unwrap_or_else(|e| e.into_inner());
        map.entry(kind).or_default().push(Arc::new(handler));
    }

    /// 通配订阅：收到所有类型的事件（在精确订阅之后派发）
    pub fn subscribe_all<F>(&self, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut list = self.wildcard.write().unwrap_or_else(|e| e.into_inner());
        list.push(Arc::new(handler));
    }

    /// 同步派发；处理器 panic 仅记录日志，不向外传播
    pub fn publish(&self, event: &Event) {
        let exact: Vec<EventHandler> = {
            let map = self.by_kind.read().unwrap_or_else(|e| e.into_inner());
            map.get(&event.kind()).cloned().unwrap_or_default()
        };
        let wildcard: Vec<EventHandler> = {
            let list = self.wildcard.read().unwrap_or_else(|e| e.into_inner());
            list.clone()
        };

        for handler in exact.iter().chain(wildcard.iter()) {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!("event handler panicked on {}", event.kind().as_str());
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message_event() -> Event {
        Event::MessageSent {
            message: MessageRecord::new("person_a", MessageKind::Info, "hello"),
        }
    }

    #[test]
    fn test_exact_then_wildcard_order() {
        let bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        bus.subscribe(EventKind::MessageSent, move |_| o.lock().unwrap().push("exact"));
        let o = Arc::clone(&order);
        bus.subscribe_all(move |_| o.lock().unwrap().push("wildcard"));

        bus.publish(&message_event());
        assert_eq!(*order.lock().unwrap(), vec!["exact", "wildcard"]);
    }

    #[test]
    fn test_wildcard_sees_everything() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&message_event());
        bus.publish(&message_event());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventKind::MessageSent, |_| panic!("boom"));
        let c = Arc::clone(&count);
        bus.subscribe(EventKind::MessageSent, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&message_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribed_kind_is_ignored() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        bus.subscribe(EventKind::RequestCreated, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&message_event());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
