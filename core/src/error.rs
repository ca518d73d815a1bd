/// Error types for the chat client core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Remote failure: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conversation view closed")]
    ViewClosed,
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Remote(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
