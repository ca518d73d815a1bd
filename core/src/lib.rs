/// ChatSphere - real-time chat client core
///
/// One persistent transport per process carries messages, typing indicators
/// and presence; a conversation view keeps the active conversation, unread
/// markers and search results consistent with those asynchronous events.

pub mod error;
pub mod config;
pub mod session;
pub mod message;
pub mod protocol;
pub mod bus;
pub mod connection;
pub mod registry;
pub mod dispatcher;
pub mod buffer;
pub mod typing;
pub mod presence;
pub mod unread;
pub mod search;
pub mod directory;
pub mod utils;
pub mod view;

pub use error::{ChatError, Result};
pub use config::Config;
pub use connection::{Connection, ConnectionManager, ConnectionState};
pub use directory::{Contact, Directory, HttpDirectory};
pub use message::Message;
pub use registry::{EventHandlers, Subscription};
pub use session::{SessionIdentity, SessionStore};
pub use view::{ChatHandle, ChatView, ViewSnapshot};
