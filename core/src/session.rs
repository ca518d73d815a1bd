/// Session identity of the locally authenticated user
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Who we are, as returned by login/registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SessionIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Ephemeral, process-scoped session storage. Never written to disk.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<SessionIdentity>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, identity: SessionIdentity) {
        let mut slot = self.current.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(identity);
    }

    pub fn current(&self) -> Option<SessionIdentity> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Logout
    pub fn clear(&self) -> Option<SessionIdentity> {
        self.current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}
