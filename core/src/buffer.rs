/// Message reconciliation buffer for the active conversation (most recent first)
use crate::message::{Message, Origin};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Optimistic copy and server echo are both kept
    #[default]
    KeepBoth,
    /// A server echo of one of our optimistic copies is dropped
    Collapse,
}

#[derive(Debug, Default)]
pub struct ConversationBuffer {
    self_id: String,
    peer: Option<String>,
    messages: VecDeque<Message>,
    policy: EchoPolicy,
}

impl ConversationBuffer {
    pub fn new(self_id: impl Into<String>, policy: EchoPolicy) -> Self {
        Self {
            self_id: self_id.into(),
            peer: None,
            messages: VecDeque::new(),
            policy,
        }
    }

    /// Switch conversation: the buffer starts empty until history arrives
    pub fn open(&mut self, peer: Option<&str>) {
        self.peer = peer.map(str::to_string);
        self.messages.clear();
    }

    /// Optimistic insert of a message we just sent
    pub fn push_local(&mut self, msg: Message) {
        self.messages.push_front(Message {
            origin: Origin::Local,
            ..msg
        });
    }

    /// Insert a delivered message if it belongs to the active conversation:
    /// sent by the peer, or our own message to the peer echoed back.
    pub fn push_remote(&mut self, msg: Message) -> bool {
        let Some(peer) = self.peer.as_deref() else {
            return false;
        };
        let own_echo = msg.sender_id == self.self_id && msg.receiver_id == peer;
        if msg.sender_id != peer && !own_echo {
            return false;
        }
        if own_echo && self.policy == EchoPolicy::Collapse && self.has_local_copy(&msg) {
            debug!("Dropping echo of optimistic message to {}", msg.receiver_id);
            return false;
        }
        self.messages.push_front(msg);
        true
    }

    fn has_local_copy(&self, msg: &Message) -> bool {
        self.messages.iter().any(|m| {
            m.origin == Origin::Local
                && m.receiver_id == msg.receiver_id
                && m.body == msg.body
                && m.timestamp == msg.timestamp
        })
    }

    /// Fill the buffer from history (most recent first). Messages inserted
    /// since `open` stay on top. A response for another peer is ignored.
    pub fn load_history(&mut self, peer: &str, history: Vec<Message>) -> bool {
        if self.peer.as_deref() != Some(peer) {
            return false;
        }
        self.messages.extend(history.into_iter().map(|m| Message {
            origin: Origin::History,
            ..m
        }));
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn latest(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }
}
