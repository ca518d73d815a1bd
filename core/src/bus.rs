/// Listener table behind the transport: named event channels with attach/detach
use crate::protocol::ServerEvent;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Event channels a listener can attach to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    ReceiveMessage,
    UserTyping,
    UserOnline,
    UserOffline,
}

impl EventKind {
    /// The four conversation-scoped channels bound by a subscription
    pub const SCOPED: [EventKind; 4] = [
        EventKind::ReceiveMessage,
        EventKind::UserTyping,
        EventKind::UserOnline,
        EventKind::UserOffline,
    ];
}

/// Everything the transport can deliver to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Server(ServerEvent),
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Connected => EventKind::Connect,
            TransportEvent::Disconnected => EventKind::Disconnect,
            TransportEvent::Server(ServerEvent::ReceiveMessage(_)) => EventKind::ReceiveMessage,
            TransportEvent::Server(ServerEvent::UserTyping(_)) => EventKind::UserTyping,
            TransportEvent::Server(ServerEvent::UserOnline(_)) => EventKind::UserOnline,
            TransportEvent::Server(ServerEvent::UserOffline(_)) => EventKind::UserOffline,
        }
    }
}

pub type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

/// Listeners are invoked in attach order, outside the table lock, so a
/// listener may attach or detach others while being called.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a listener to one channel
    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    /// Detach one listener. Detaching an unknown id is a no-op.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let Some(list) = inner.listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        before != list.len()
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock()
            .listeners
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver an event to the listeners of its channel; returns how many ran
    pub fn dispatch(&self, event: &TransportEvent) -> usize {
        let targets: Vec<Listener> = self
            .lock()
            .listeners
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in &targets {
            listener(event);
        }
        targets.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        let counts: HashMap<EventKind, usize> = inner
            .listeners
            .iter()
            .map(|(k, v)| (*k, v.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
