/// Conversation view: one task owns every per-conversation state machine and
/// applies transport events, timer expiries, remote responses and UI commands
/// strictly one at a time.
use crate::buffer::{ConversationBuffer, EchoPolicy};
use crate::config::Config;
use crate::connection::{Connection, ConnectionState};
use crate::directory::{Contact, Directory};
use crate::error::{ChatError, Result};
use crate::message::Message;
use crate::presence::PresenceTracker;
use crate::registry::{EventHandlers, Subscription};
use crate::search::{SearchState, SearchStep, SearchTicket};
use crate::session::SessionIdentity;
use crate::typing::{TypingIndicator, TypingTicket};
use crate::unread::UnreadTracker;
use crate::utils::DelayedTask;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Everything a renderer needs, published after each processed event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSnapshot {
    pub connected: bool,
    pub active_peer: Option<Contact>,
    /// Most recent first
    pub messages: Vec<Message>,
    pub peer_typing: bool,
    pub peer_online: bool,
    /// Senders with unseen messages, sorted
    pub unread: Vec<String>,
    pub contacts: Vec<Contact>,
    pub search: SearchState,
}

enum ViewEvent {
    SelectPeer(Contact),
    Send {
        body: String,
        reply: oneshot::Sender<Result<Message>>,
    },
    NotifyTyping,
    Search(String),
    RefreshContacts,
    Inbound(Message),
    PeerTyping(String),
    Online(String),
    Offline(String),
    TypingExpired(TypingTicket),
    SearchResolved(SearchTicket, Result<Vec<Contact>>),
    HistoryLoaded {
        peer: String,
        result: Result<Vec<Message>>,
    },
    ContactsLoaded(Result<Vec<Contact>>),
    Shutdown,
}

type WeakEvents = mpsc::WeakUnboundedSender<ViewEvent>;

fn forward(events: &WeakEvents, event: ViewEvent) {
    if let Some(tx) = events.upgrade() {
        let _ = tx.send(event);
    }
}

/// Handle to a running view. Clones share the same view; the view stops when
/// `shutdown` is called or the last handle is dropped.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    events: mpsc::UnboundedSender<ViewEvent>,
    snapshot: watch::Receiver<ViewSnapshot>,
}

impl ChatHandle {
    fn post(&self, event: ViewEvent) -> bool {
        if self.events.send(event).is_err() {
            debug!("Conversation view already stopped");
            return false;
        }
        true
    }

    /// Make `contact` the active conversation
    pub fn select_peer(&self, contact: Contact) -> bool {
        self.post(ViewEvent::SelectPeer(contact))
    }

    /// Send to the active peer. On success the optimistic copy is already in
    /// the buffer when this returns.
    pub async fn send_message(&self, body: impl Into<String>) -> Result<Message> {
        let (reply, rx) = oneshot::channel();
        if !self.post(ViewEvent::Send {
            body: body.into(),
            reply,
        }) {
            return Err(ChatError::ViewClosed);
        }
        rx.await.map_err(|_| ChatError::ViewClosed)?
    }

    /// One keystroke in the compose box
    pub fn notify_typing(&self) -> bool {
        self.post(ViewEvent::NotifyTyping)
    }

    /// Raw input from the search box
    pub fn search(&self, query: impl Into<String>) -> bool {
        self.post(ViewEvent::Search(query.into()))
    }

    pub fn refresh_contacts(&self) -> bool {
        self.post(ViewEvent::RefreshContacts)
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait for the next published snapshot. Returns `None` once the view stopped.
    pub async fn changed(&mut self) -> Option<ViewSnapshot> {
        self.snapshot.changed().await.ok()?;
        Some(self.snapshot.borrow_and_update().clone())
    }

    pub fn shutdown(&self) {
        self.post(ViewEvent::Shutdown);
    }
}

pub struct ChatView {
    session: SessionIdentity,
    connection: Arc<Connection>,
    directory: Arc<dyn Directory>,
    subscription: Subscription,
    events: WeakEvents,
    snapshot: watch::Sender<ViewSnapshot>,

    active: Option<Contact>,
    connected: bool,
    buffer: ConversationBuffer,
    typing: TypingIndicator,
    presence: PresenceTracker,
    unread: UnreadTracker,
    search: SearchState,
    contacts: Vec<Contact>,

    typing_expiry: Duration,
    search_debounce: Duration,
    typing_timer: DelayedTask,
    search_task: DelayedTask,
    history_task: DelayedTask,
    contacts_task: DelayedTask,
}

impl ChatView {
    /// Start the view task. Must be called inside a Tokio runtime.
    pub fn spawn(
        connection: Arc<Connection>,
        session: SessionIdentity,
        directory: Arc<dyn Directory>,
        config: &Config,
    ) -> ChatHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = tx.downgrade();
        let (snapshot, snapshot_rx) = watch::channel(ViewSnapshot::default());

        let handlers = {
            let (m, t, on, off) = (events.clone(), events.clone(), events.clone(), events.clone());
            EventHandlers::new()
                .on_message(move |msg| forward(&m, ViewEvent::Inbound(msg)))
                .on_typing(move |sender| forward(&t, ViewEvent::PeerTyping(sender)))
                .on_user_online(move |id| forward(&on, ViewEvent::Online(id)))
                .on_user_offline(move |id| forward(&off, ViewEvent::Offline(id)))
        };
        let subscription = Subscription::subscribe(connection.clone(), &session.id, handlers, None);

        let policy = if config.collapse_echoes {
            EchoPolicy::Collapse
        } else {
            EchoPolicy::KeepBoth
        };

        let view = ChatView {
            buffer: ConversationBuffer::new(session.id.clone(), policy),
            session,
            connection,
            directory,
            subscription,
            events,
            snapshot,
            active: None,
            connected: false,
            typing: TypingIndicator::new(),
            presence: PresenceTracker::new(),
            unread: UnreadTracker::new(),
            search: SearchState::new(),
            contacts: Vec::new(),
            typing_expiry: config.typing_expiry,
            search_debounce: config.search_debounce,
            typing_timer: DelayedTask::new(),
            search_task: DelayedTask::new(),
            history_task: DelayedTask::new(),
            contacts_task: DelayedTask::new(),
        };

        tokio::spawn(view.run(rx));

        ChatHandle {
            events: tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ViewEvent>) {
        let mut state = self.connection.watch_state();
        let mut watching = true;
        self.connected = *state.borrow_and_update() == ConnectionState::Connected;
        self.refresh_contacts();
        self.publish();

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(ViewEvent::Shutdown) | None => break,
                    Some(event) => self.handle(event),
                },
                changed = state.changed(), if watching => match changed {
                    Ok(()) => {
                        self.connected = *state.borrow_and_update() == ConnectionState::Connected;
                    }
                    Err(_) => watching = false,
                },
            }
            self.publish();
        }

        self.typing_timer.cancel();
        self.search_task.cancel();
        self.history_task.cancel();
        self.contacts_task.cancel();
        let removed = self.subscription.detach();
        debug!("Conversation view for {} stopped ({} listeners removed)", self.session.id, removed);
    }

    fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.id.as_str())
    }

    fn handle(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::SelectPeer(contact) => self.select_peer(contact),
            ViewEvent::Send { body, reply } => {
                let _ = reply.send(self.send_message(&body));
            }
            ViewEvent::NotifyTyping => {
                if let Some(peer) = self.active_id() {
                    // Failure is already logged by the dispatcher
                    let _ = self.subscription.send_typing(peer);
                }
            }
            ViewEvent::Search(query) => self.search(&query),
            ViewEvent::RefreshContacts => self.refresh_contacts(),
            ViewEvent::Inbound(msg) => {
                let active = self.active.as_ref().map(|c| c.id.as_str());
                if msg.sender_id != self.session.id
                    && self.unread.on_message(&msg.sender_id, active)
                {
                    debug!("Unread message from {}", msg.sender_id);
                }
                self.buffer.push_remote(msg);
            }
            ViewEvent::PeerTyping(sender) => {
                if let Some(ticket) = self.typing.on_typing(&sender) {
                    let events = self.events.clone();
                    self.typing_timer.schedule(self.typing_expiry, async move {
                        forward(&events, ViewEvent::TypingExpired(ticket));
                    });
                }
            }
            ViewEvent::Online(id) => self.presence.set_online(&id),
            ViewEvent::Offline(id) => self.presence.set_offline(&id),
            ViewEvent::TypingExpired(ticket) => {
                self.typing.expire(&ticket);
            }
            ViewEvent::SearchResolved(ticket, result) => {
                self.search.resolve(&ticket, result);
            }
            ViewEvent::HistoryLoaded { peer, result } => match result {
                Ok(history) => {
                    let count = history.len();
                    if self.buffer.load_history(&peer, history) {
                        debug!("Loaded {} history messages with {}", count, peer);
                    } else {
                        debug!("Discarding stale history for {}", peer);
                    }
                }
                Err(e) => warn!("Failed to load history with {}: {}", peer, e),
            },
            ViewEvent::ContactsLoaded(result) => match result {
                Ok(contacts) if !contacts.is_empty() => self.contacts = contacts,
                Ok(_) => debug!("No recent contacts returned, keeping {}", self.contacts.len()),
                Err(e) => warn!("Failed to load recent contacts: {}", e),
            },
            ViewEvent::Shutdown => {}
        }
    }

    fn select_peer(&mut self, contact: Contact) {
        let peer = contact.id.clone();
        self.unread.mark_read(&peer);
        self.buffer.open(Some(peer.as_str()));
        self.typing.open(Some(peer.as_str()));
        self.typing_timer.cancel();
        self.search.reset();
        self.search_task.cancel();
        self.subscription.set_scope_peer(Some(peer.as_str()));
        info!("Opened conversation with {} ({})", contact.name, peer);
        self.active = Some(contact);

        let directory = self.directory.clone();
        let events = self.events.clone();
        let own_id = self.session.id.clone();
        self.history_task.schedule(Duration::ZERO, async move {
            let result = directory.fetch_history(&own_id, &peer).await;
            forward(&events, ViewEvent::HistoryLoaded { peer, result });
        });
    }

    fn send_message(&mut self, body: &str) -> Result<Message> {
        if body.trim().is_empty() {
            return Err(ChatError::InvalidInput("message body is empty".to_string()));
        }
        let peer = self
            .active_id()
            .ok_or_else(|| ChatError::InvalidInput("no conversation selected".to_string()))?
            .to_string();

        let msg = self.subscription.send(&peer, body)?;
        self.buffer.push_local(msg.clone());
        Ok(msg)
    }

    fn search(&mut self, query: &str) {
        match self.search.input(query) {
            SearchStep::Cleared => {
                self.search_task.cancel();
            }
            SearchStep::Scheduled(ticket) => {
                let directory = self.directory.clone();
                let events = self.events.clone();
                // Debounce and lookup share the slot: newer input aborts both
                self.search_task.schedule(self.search_debounce, async move {
                    let result = directory.search_users(&ticket.query).await;
                    forward(&events, ViewEvent::SearchResolved(ticket, result));
                });
            }
        }
    }

    fn refresh_contacts(&mut self) {
        let directory = self.directory.clone();
        let events = self.events.clone();
        let own_id = self.session.id.clone();
        self.contacts_task.schedule(Duration::ZERO, async move {
            let result = directory.recent_contacts(&own_id).await;
            forward(&events, ViewEvent::ContactsLoaded(result));
        });
    }

    /// Publish the current state unless it equals the last snapshot
    fn publish(&self) -> bool {
        let active = self.active_id();
        let next = ViewSnapshot {
            connected: self.connected,
            active_peer: self.active.clone(),
            messages: self.buffer.to_vec(),
            peer_typing: self.typing.is_showing(),
            peer_online: active.map(|id| self.presence.is_online(id)).unwrap_or(false),
            unread: self.unread.iter().cloned().collect(),
            contacts: self.contacts.clone(),
            search: self.search.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}
