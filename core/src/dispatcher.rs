/// Outbound actions: send message and send typing, guarded by connectivity
use crate::connection::Connection;
use crate::error::{ChatError, Result};
use crate::message::{Message, WireMessage};
use crate::protocol::{ClientAction, TypingPayload};
use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    connection: Arc<Connection>,
    sender_id: String,
}

impl Dispatcher {
    pub fn new(connection: Arc<Connection>, sender_id: impl Into<String>) -> Self {
        Self {
            connection,
            sender_id: sender_id.into(),
        }
    }

    /// Emit `send_message` stamped with the current time and return the
    /// message so the caller can insert its optimistic copy. Does not wait
    /// for any acknowledgement.
    pub fn send(&self, receiver_id: &str, body: &str) -> Result<Message> {
        if !self.connection.is_connected() {
            error!("Cannot send message: transport not connected");
            return Err(ChatError::NotConnected);
        }

        // Millisecond precision so the local copy matches what goes on the wire
        let now = Utc::now().trunc_subsecs(3);
        let msg = Message::local(&self.sender_id, receiver_id, body, now);
        self.connection
            .emit(ClientAction::SendMessage(WireMessage::from(&msg)))
            .inspect_err(|_| error!("Cannot send message: transport not connected"))?;

        debug!("Sent message to {} ({} bytes)", receiver_id, body.len());
        Ok(msg)
    }

    /// Emit `typing`. Fire-and-forget, one action per call.
    pub fn send_typing(&self, receiver_id: &str) -> Result<()> {
        if !self.connection.is_connected() {
            error!("Cannot send typing: transport not connected");
            return Err(ChatError::NotConnected);
        }

        self.connection
            .emit(ClientAction::Typing(TypingPayload {
                sender_id: self.sender_id.clone(),
                receiver_id: Some(receiver_id.to_string()),
            }))
            .inspect_err(|_| error!("Cannot send typing: transport not connected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;

    #[test]
    fn test_send_while_disconnected_emits_nothing() {
        let (conn, mut rx) = Connection::detached("A");
        let dispatcher = Dispatcher::new(Arc::new(conn), "A");

        assert!(matches!(dispatcher.send("B", "hello"), Err(ChatError::NotConnected)));
        assert!(matches!(dispatcher.send_typing("B"), Err(ChatError::NotConnected)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_emits_action_with_session_sender() {
        let (conn, mut rx) = Connection::detached("A");
        conn.force_state(ConnectionState::Connected);
        let dispatcher = Dispatcher::new(Arc::new(conn), "A");

        let msg = dispatcher.send("B", "hello").unwrap();
        assert_eq!(msg.sender_id, "A");
        assert_eq!(msg.receiver_id, "B");

        match rx.try_recv().unwrap() {
            ClientAction::SendMessage(wire) => {
                assert_eq!(wire.sender_id, "A");
                assert_eq!(wire.message, "hello");
                assert_eq!(
                    wire.timestamp,
                    Some(serde_json::Value::String(msg.timestamp_iso()))
                );
            }
            other => panic!("unexpected action {}", other),
        }

        dispatcher.send_typing("B").unwrap();
        dispatcher.send_typing("B").unwrap();
        assert!(matches!(rx.try_recv().unwrap(), ClientAction::Typing(_)));
        assert!(matches!(rx.try_recv().unwrap(), ClientAction::Typing(_)));
    }
}
