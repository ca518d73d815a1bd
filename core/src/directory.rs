/// Directory API: history, user search, recent contacts and login over HTTP
use crate::error::{ChatError, Result};
use crate::message::{Message, Origin, WireMessage};
use crate::session::SessionIdentity;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A user as listed by search and recent contacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
}

impl Contact {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Request/response collaborators of the chat core. No streaming.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Conversation between two users, most recent first
    async fn fetch_history(&self, peer_a: &str, peer_b: &str) -> Result<Vec<Message>>;

    async fn search_users(&self, query: &str) -> Result<Vec<Contact>>;

    async fn recent_contacts(&self, user_id: &str) -> Result<Vec<Contact>>;

    async fn login(&self, email: &str, password: &str) -> Result<SessionIdentity>;

    async fn register(&self, name: &str, email: &str, password: &str) -> Result<SessionIdentity>;
}

#[derive(Serialize)]
struct HistoryRequest<'a> {
    user1: &'a str,
    user2: &'a str,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    user: Contact,
    #[serde(default)]
    token: Option<String>,
}

impl From<AuthResponse> for SessionIdentity {
    fn from(r: AuthResponse) -> Self {
        SessionIdentity {
            id: r.user.id,
            name: r.user.name,
            token: r.token,
        }
    }
}

/// JSON-over-HTTP implementation
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
        expected: StatusCode,
    ) -> Result<T> {
        let status = response.status();
        if status != expected && !(expected == StatusCode::OK && status.is_success()) {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Remote(format!(
                "{} returned {}: {}",
                path, status, body
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ChatError::Remote(format!("{}: invalid response body: {}", path, e)))
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        expected: StatusCode,
    ) -> Result<T> {
        debug!("POST {}", path);
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::read(path, response, expected).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!("GET {}", path);
        let response = self.client.get(self.url(path)).send().await?;
        Self::read(path, response, StatusCode::OK).await
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn fetch_history(&self, peer_a: &str, peer_b: &str) -> Result<Vec<Message>> {
        let rows: Option<Vec<WireMessage>> = self
            .post(
                "/messages",
                &HistoryRequest {
                    user1: peer_a,
                    user2: peer_b,
                },
                StatusCode::OK,
            )
            .await?;
        let now = Utc::now();
        Ok(rows
            .unwrap_or_default()
            .into_iter()
            .map(|row| Message::from_wire(row, Origin::History, now))
            .collect())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<Contact>> {
        let found: Option<Vec<Contact>> = self
            .post("/search", &SearchRequest { name: query }, StatusCode::OK)
            .await?;
        Ok(found.unwrap_or_default())
    }

    async fn recent_contacts(&self, user_id: &str) -> Result<Vec<Contact>> {
        let contacts: Option<Vec<Contact>> =
            self.get(&format!("/recent-contacts/{}", user_id)).await?;
        Ok(contacts.unwrap_or_default())
    }

    async fn login(&self, email: &str, password: &str) -> Result<SessionIdentity> {
        let auth: AuthResponse = self
            .post("/login", &LoginRequest { email, password }, StatusCode::OK)
            .await?;
        Ok(auth.into())
    }

    async fn register(&self, name: &str, email: &str, password: &str) -> Result<SessionIdentity> {
        let auth: AuthResponse = self
            .post(
                "/register",
                &RegisterRequest {
                    name,
                    email,
                    password,
                },
                StatusCode::CREATED,
            )
            .await?;
        Ok(auth.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_response_into_session() {
        let auth: AuthResponse = serde_json::from_str(
            r#"{"user":{"id":"u7","name":"Ada","email":"ada@example.com"},"token":"jwt"}"#,
        )
        .unwrap();
        let session: SessionIdentity = auth.into();
        assert_eq!(session, SessionIdentity::new("u7", "Ada").with_token("jwt"));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let dir = HttpDirectory::new("http://localhost:5000/").unwrap();
        assert_eq!(dir.url("/search"), "http://localhost:5000/search");
    }
}
