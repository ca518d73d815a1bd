/// Wire protocol: event envelopes and the length-prefixed frame codec
use crate::error::{ChatError, Result};
use crate::message::WireMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted in one frame (1 MiB)
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
}

/// Events pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(WireMessage),
    UserTyping(TypingPayload),
    UserOnline(PresencePayload),
    UserOffline(PresencePayload),
}

/// Actions emitted by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientAction {
    /// Joins the server-side routing group for this user id
    Join(String),
    SendMessage(WireMessage),
    Typing(TypingPayload),
}

impl ServerEvent {
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::UserOnline(_) => "user_online",
            ServerEvent::UserOffline(_) => "user_offline",
        }
    }
}

impl ClientAction {
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ClientAction::Join(_) => "join",
            ClientAction::SendMessage(_) => "send_message",
            ClientAction::Typing(_) => "typing",
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerEvent({})", self.event_name())
    }
}

impl fmt::Display for ClientAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientAction({})", self.event_name())
    }
}

/// Protocol frame with length prefix
#[derive(Debug)]
pub struct Frame {
    pub length: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(ChatError::Protocol(format!(
                "Frame of {} bytes exceeds limit of {}",
                payload.len(),
                MAX_FRAME_LEN
            )));
        }
        Ok(Self {
            length: payload.len() as u32,
            payload,
        })
    }

    pub fn from_action(action: &ClientAction) -> Result<Self> {
        Self::new(action.to_bytes()?)
    }

    pub fn from_event(event: &ServerEvent) -> Result<Self> {
        Self::new(event.to_bytes()?)
    }

    /// Serialize frame to bytes (length prefix + payload)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.payload.len());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Read one frame. `Ok(None)` means the peer closed the stream between frames.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Self>>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ChatError::Io(e)),
        }

        let length = u32::from_be_bytes(len_buf) as usize;
        if length > MAX_FRAME_LEN {
            return Err(ChatError::Protocol(format!(
                "Incoming frame of {} bytes exceeds limit of {}",
                length, MAX_FRAME_LEN
            )));
        }

        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).await?;
        Ok(Some(Self {
            length: length as u32,
            payload,
        }))
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}
