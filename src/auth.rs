//! Server-side authentication: shared API key and password-issued sessions.
//!
//! Two headers guard the document and query routes:
//!
//! | Header | Missing | Wrong |
//! |--------|---------|-------|
//! | `X-API-Key` | 401 | 403 |
//! | `X-User-Token` | 401 | 401 |
//!
//! Sessions live in memory and expire `session_ttl_secs` after login. Each
//! login mints a fresh `user_id`, which scopes every document it uploads.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const USER_TOKEN_HEADER: &str = "X-User-Token";

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: String,
    created_at: Instant,
}

/// Why a protected request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingApiKey,
    InvalidApiKey,
    MissingToken,
    InvalidToken,
}

impl AuthFailure {
    pub fn status(self) -> u16 {
        match self {
            AuthFailure::InvalidApiKey => 403,
            _ => 401,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            AuthFailure::MissingApiKey => "Missing API key. Include X-API-Key header.",
            AuthFailure::InvalidApiKey => "Invalid API key.",
            AuthFailure::MissingToken => "Missing user token. Include X-User-Token header.",
            AuthFailure::InvalidToken => "Invalid or expired user token. Please login again.",
        }
    }
}

/// In-memory registry of issued session tokens.
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

/// Token and user id handed out by a successful login.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub user_id: String,
}

fn generate_token() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_user_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn digest(s: &str) -> [u8; 32] {
    Sha256::digest(s.as_bytes()).into()
}

/// Compares secrets through their digests so the comparison time does not
/// depend on where the inputs first differ.
pub fn secrets_match(given: &str, expected: &str) -> bool {
    let a = digest(given);
    let b = digest(expected);
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Checks the `X-API-Key` header value.
pub fn check_api_key(given: Option<&str>, expected: &str) -> Result<(), AuthFailure> {
    match given {
        None => Err(AuthFailure::MissingApiKey),
        Some(k) if secrets_match(k, expected) => Ok(()),
        Some(_) => Err(AuthFailure::InvalidApiKey),
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Mints a new session when `password` matches.
    pub async fn login(&self, password: &str, expected: &str) -> Option<IssuedSession> {
        if !secrets_match(password, expected) {
            return None;
        }
        let issued = IssuedSession {
            token: generate_token(),
            user_id: generate_user_id(),
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            issued.token.clone(),
            SessionEntry {
                user_id: issued.user_id.clone(),
                created_at: Instant::now(),
            },
        );
        let ttl = self.ttl;
        sessions.retain(|_, s| s.created_at.elapsed() <= ttl);
        Some(issued)
    }

    /// The owning user of a live token.
    pub async fn user_id(&self, token: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|s| s.created_at.elapsed() <= self.ttl)
            .map(|s| s.user_id.clone())
    }

    pub async fn validate(&self, token: &str) -> bool {
        self.cleanup().await;
        self.user_id(token).await.is_some()
    }

    pub async fn logout(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    /// Resolves the `X-User-Token` header value to a user id.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<String, AuthFailure> {
        let token = token.ok_or(AuthFailure::MissingToken)?;
        self.user_id(token).await.ok_or(AuthFailure::InvalidToken)
    }

    async fn cleanup(&self) {
        let ttl = self.ttl;
        self.sessions
            .write()
            .await
            .retain(|_, s| s.created_at.elapsed() <= ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_login_validate_logout() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(store.login("wrong", "secret").await.is_none());

        let s = store.login("secret", "secret").await.unwrap();
        assert_eq!(s.user_id.len(), 32);
        assert!(store.validate(&s.token).await);
        assert_eq!(store.authenticate(Some(&s.token)).await.unwrap(), s.user_id);

        store.logout(&s.token).await;
        assert!(!store.validate(&s.token).await);
        assert_eq!(
            store.authenticate(Some(&s.token)).await.unwrap_err(),
            AuthFailure::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_each_login_gets_its_own_user() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.login("pw", "pw").await.unwrap();
        let b = store.login("pw", "pw").await.unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(a.user_id, b.user_id);
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let store = SessionStore::new(Duration::from_millis(10));
        let s = store.login("pw", "pw").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!store.validate(&s.token).await);
    }

    #[tokio::test]
    async fn test_missing_token() {
        let store = SessionStore::new(Duration::from_secs(60));
        let err = store.authenticate(None).await.unwrap_err();
        assert_eq!(err, AuthFailure::MissingToken);
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn test_api_key_statuses() {
        assert_eq!(check_api_key(None, "k").unwrap_err().status(), 401);
        assert_eq!(check_api_key(Some("x"), "k").unwrap_err().status(), 403);
        assert!(check_api_key(Some("k"), "k").is_ok());
    }

    #[test]
    fn test_token_is_url_safe() {
        let t = generate_token();
        assert_eq!(t.len(), 43);
        assert!(t
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
