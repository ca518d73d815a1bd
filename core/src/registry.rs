/// Event subscription registry: binds a handler bundle to the transport for
/// one (user, peer) scope and unbinds it cleanly.
use crate::bus::{EventKind, Listener, ListenerId, TransportEvent};
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::message::{Message, Origin};
use crate::protocol::ServerEvent;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// The four optional callbacks a view can be interested in. An absent
/// handler means its channel is never attached.
#[derive(Clone, Default)]
pub struct EventHandlers {
    on_message: Option<Handler<Message>>,
    on_typing: Option<Handler<String>>,
    on_user_online: Option<Handler<String>>,
    on_user_offline: Option<Handler<String>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called with the sender id
    pub fn on_typing<F>(mut self, f: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_typing = Some(Arc::new(f));
        self
    }

    pub fn on_user_online<F>(mut self, f: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_user_online = Some(Arc::new(f));
        self
    }

    pub fn on_user_offline<F>(mut self, f: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.on_user_offline = Some(Arc::new(f));
        self
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::ReceiveMessage => self.on_message.is_some(),
            EventKind::UserTyping => self.on_typing.is_some(),
            EventKind::UserOnline => self.on_user_online.is_some(),
            EventKind::UserOffline => self.on_user_offline.is_some(),
            EventKind::Connect | EventKind::Disconnect => false,
        }
    }

    /// Identity comparison: true when every slot holds the very same callback
    pub fn same_as(&self, other: &EventHandlers) -> bool {
        fn slot_eq<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
        }
        slot_eq(&self.on_message, &other.on_message)
            && slot_eq(&self.on_typing, &other.on_typing)
            && slot_eq(&self.on_user_online, &other.on_user_online)
            && slot_eq(&self.on_user_offline, &other.on_user_offline)
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_typing", &self.on_typing.is_some())
            .field("on_user_online", &self.on_user_online.is_some())
            .field("on_user_offline", &self.on_user_offline.is_some())
            .finish()
    }
}

/// Listeners attached for one scope. Any change of user, peer or handler
/// identity detaches everything before attaching again; drop detaches.
pub struct Subscription {
    connection: Arc<Connection>,
    user_id: String,
    scope_peer: Option<String>,
    handlers: EventHandlers,
    attached: Vec<(EventKind, ListenerId)>,
    dispatcher: Dispatcher,
}

impl Subscription {
    pub fn subscribe(
        connection: Arc<Connection>,
        user_id: &str,
        handlers: EventHandlers,
        scope_peer: Option<&str>,
    ) -> Self {
        let dispatcher = Dispatcher::new(connection.clone(), user_id);
        let mut sub = Self {
            connection,
            user_id: user_id.to_string(),
            scope_peer: scope_peer.map(str::to_string),
            handlers,
            attached: Vec::new(),
            dispatcher,
        };
        sub.attach();
        sub
    }

    /// Re-bind if the scope tuple changed. Returns whether a re-bind happened.
    pub fn update(
        &mut self,
        user_id: &str,
        handlers: EventHandlers,
        scope_peer: Option<&str>,
    ) -> bool {
        let unchanged = self.user_id == user_id
            && self.scope_peer.as_deref() == scope_peer
            && self.handlers.same_as(&handlers);
        if unchanged {
            return false;
        }

        self.detach();
        if self.user_id != user_id {
            self.dispatcher = Dispatcher::new(self.connection.clone(), user_id);
        }
        self.user_id = user_id.to_string();
        self.scope_peer = scope_peer.map(str::to_string);
        self.handlers = handlers;
        self.attach();
        true
    }

    /// Narrow the scope to another peer keeping user and handlers
    pub fn set_scope_peer(&mut self, scope_peer: Option<&str>) -> bool {
        let user_id = self.user_id.clone();
        let handlers = self.handlers.clone();
        self.update(&user_id, handlers, scope_peer)
    }

    fn attach(&mut self) {
        if self.user_id.is_empty() {
            return;
        }
        let bus = self.connection.bus();

        if let Some(handler) = self.handlers.on_message.clone() {
            let listener: Listener = Arc::new(move |event: &TransportEvent| {
                if let TransportEvent::Server(ServerEvent::ReceiveMessage(wire)) = event {
                    handler(Message::from_wire(wire.clone(), Origin::Remote, Utc::now()));
                }
            });
            let id = bus.on(EventKind::ReceiveMessage, listener);
            self.attached.push((EventKind::ReceiveMessage, id));
        }

        if let Some(handler) = self.handlers.on_typing.clone() {
            let scope_peer = self.scope_peer.clone();
            let listener: Listener = Arc::new(move |event: &TransportEvent| {
                if let TransportEvent::Server(ServerEvent::UserTyping(payload)) = event {
                    // Typing from anyone but the scoped peer is dropped here
                    if scope_peer.as_deref() == Some(payload.sender_id.as_str()) {
                        handler(payload.sender_id.clone());
                    }
                }
            });
            let id = bus.on(EventKind::UserTyping, listener);
            self.attached.push((EventKind::UserTyping, id));
        }

        if let Some(handler) = self.handlers.on_user_online.clone() {
            let listener: Listener = Arc::new(move |event: &TransportEvent| {
                if let TransportEvent::Server(ServerEvent::UserOnline(payload)) = event {
                    handler(payload.user_id.clone());
                }
            });
            let id = bus.on(EventKind::UserOnline, listener);
            self.attached.push((EventKind::UserOnline, id));
        }

        if let Some(handler) = self.handlers.on_user_offline.clone() {
            let listener: Listener = Arc::new(move |event: &TransportEvent| {
                if let TransportEvent::Server(ServerEvent::UserOffline(payload)) = event {
                    handler(payload.user_id.clone());
                }
            });
            let id = bus.on(EventKind::UserOffline, listener);
            self.attached.push((EventKind::UserOffline, id));
        }

        debug!(
            "Attached {} listeners for {} (peer {:?})",
            self.attached.len(),
            self.user_id,
            self.scope_peer
        );
    }

    /// Detach all four channels. Safe to call repeatedly.
    pub fn detach(&mut self) -> usize {
        let bus = self.connection.bus();
        let mut removed = 0;
        for kind in EventKind::SCOPED {
            for (_, id) in self.attached.iter().filter(|(k, _)| *k == kind) {
                if bus.off(kind, *id) {
                    removed += 1;
                }
            }
        }
        self.attached.clear();
        removed
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn scope_peer(&self) -> Option<&str> {
        self.scope_peer.as_deref()
    }

    pub fn send(&self, receiver_id: &str, body: &str) -> Result<Message> {
        self.dispatcher.send(receiver_id, body)
    }

    pub fn send_typing(&self, receiver_id: &str) -> Result<()> {
        self.dispatcher.send_typing(receiver_id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("user_id", &self.user_id)
            .field("scope_peer", &self.scope_peer)
            .field("handlers", &self.handlers)
            .field("attached", &self.attached.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WireMessage;
    use crate::protocol::{PresencePayload, TypingPayload};
    use std::sync::Mutex;

    fn typing_from(sender: &str) -> TransportEvent {
        TransportEvent::Server(ServerEvent::UserTyping(TypingPayload {
            sender_id: sender.to_string(),
            receiver_id: None,
        }))
    }

    fn message_from(sender: &str, timestamp: serde_json::Value) -> TransportEvent {
        TransportEvent::Server(ServerEvent::ReceiveMessage(WireMessage {
            sender_id: sender.to_string(),
            receiver_id: "A".to_string(),
            message: "hi".to_string(),
            timestamp: Some(timestamp),
        }))
    }

    fn counts(conn: &Connection) -> [usize; 4] {
        EventKind::SCOPED.map(|k| conn.bus().listener_count(k))
    }

    fn full_handlers() -> EventHandlers {
        EventHandlers::new()
            .on_message(|_| {})
            .on_typing(|_| {})
            .on_user_online(|_| {})
            .on_user_offline(|_| {})
    }

    #[test]
    fn test_resubscribing_never_accumulates_listeners() {
        let (conn, _rx) = Connection::detached("A");
        let conn = Arc::new(conn);
        let mut sub = Subscription::subscribe(conn.clone(), "A", full_handlers(), Some("B"));
        let after_one = counts(&conn);
        assert_eq!(after_one, [1, 1, 1, 1]);

        for i in 0..25 {
            // New closures each round: a fresh identity forces a re-bind
            let peer = format!("P{}", i % 3);
            assert!(sub.update("A", full_handlers(), Some(peer.as_str())));
            assert_eq!(counts(&conn), after_one);
        }

        drop(sub);
        assert_eq!(counts(&conn), [0, 0, 0, 0]);
    }

    #[test]
    fn test_unchanged_scope_is_not_rebound() {
        let (conn, _rx) = Connection::detached("A");
        let handlers = full_handlers();
        let mut sub = Subscription::subscribe(Arc::new(conn), "A", handlers.clone(), Some("B"));
        assert!(!sub.update("A", handlers.clone(), Some("B")));
        assert!(sub.update("A", handlers, Some("C")));
        assert_eq!(sub.scope_peer(), Some("C"));
    }

    #[test]
    fn test_detach_is_idempotent_with_partial_handlers() {
        let (conn, _rx) = Connection::detached("A");
        let conn = Arc::new(conn);
        let mut sub = Subscription::subscribe(
            conn.clone(),
            "A",
            EventHandlers::new().on_message(|_| {}),
            None,
        );
        assert_eq!(counts(&conn), [1, 0, 0, 0]);
        assert_eq!(sub.detach(), 1);
        assert_eq!(sub.detach(), 0);
        assert_eq!(counts(&conn), [0, 0, 0, 0]);
    }

    #[test]
    fn test_detach_leaves_other_subscriptions_alone() {
        let (conn, _rx) = Connection::detached("A");
        let conn = Arc::new(conn);
        let _sidebar = Subscription::subscribe(
            conn.clone(),
            "A",
            EventHandlers::new().on_message(|_| {}),
            None,
        );
        let mut view = Subscription::subscribe(conn.clone(), "A", full_handlers(), Some("B"));
        view.detach();
        assert_eq!(counts(&conn), [1, 0, 0, 0]);
    }

    #[test]
    fn test_empty_user_attaches_nothing() {
        let (conn, _rx) = Connection::detached("");
        let conn = Arc::new(conn);
        let sub = Subscription::subscribe(conn.clone(), "", full_handlers(), Some("B"));
        assert_eq!(sub.attached_count(), 0);
        assert_eq!(counts(&conn), [0, 0, 0, 0]);
    }

    #[test]
    fn test_typing_filtered_to_scoped_peer() {
        let (conn, _rx) = Connection::detached("A");
        let conn = Arc::new(conn);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let mut sub = Subscription::subscribe(
            conn.clone(),
            "A",
            EventHandlers::new().on_typing(move |id| s.lock().unwrap().push(id)),
            Some("B"),
        );

        conn.bus().dispatch(&typing_from("C"));
        conn.bus().dispatch(&typing_from("B"));
        sub.set_scope_peer(Some("C"));
        conn.bus().dispatch(&typing_from("B"));
        conn.bus().dispatch(&typing_from("C"));

        assert_eq!(*seen.lock().unwrap(), vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_messages_and_presence_forwarded_for_any_peer() {
        let (conn, _rx) = Connection::detached("A");
        let conn = Arc::new(conn);
        let messages = Arc::new(Mutex::new(Vec::new()));
        let online = Arc::new(Mutex::new(Vec::new()));
        let (m, o) = (messages.clone(), online.clone());
        let _sub = Subscription::subscribe(
            conn.clone(),
            "A",
            EventHandlers::new()
                .on_message(move |msg| m.lock().unwrap().push(msg))
                .on_user_online(move |id| o.lock().unwrap().push(id)),
            Some("B"),
        );

        let before = Utc::now();
        conn.bus()
            .dispatch(&message_from("C", serde_json::json!("not-a-date")));
        conn.bus()
            .dispatch(&TransportEvent::Server(ServerEvent::UserOnline(PresencePayload {
                user_id: "Z".to_string(),
            })));

        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_id, "C");
        assert!(messages[0].timestamp >= before);
        assert!(messages[0].timestamp <= Utc::now());
        assert_eq!(*online.lock().unwrap(), vec!["Z".to_string()]);
    }
}
