//! Client-side authentication state.
//!
//! A session is either [`AuthState::LoggedOut`] or [`AuthState::LoggedIn`].
//! The only automatic transition is [`Session::expire`], fired by the API
//! client when a protected route answers 401: it clears the stored token and
//! bumps the reload generation exactly once, however many 401s arrive.
//!
//! Tokens persist between runs through a [`TokenStore`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ApiClient, ApiError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn {
        token: String,
        user_id: Option<String>,
    },
}

/// What a [`TokenStore`] persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Persistent storage for the session token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredSession>>;
    fn save(&self, session: &StoredSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Stores the session as JSON in a file, by default
/// `<config dir>/legal-rag/session.json`.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file: {}", self.path.display()))?;
        match serde_json::from_str(&raw) {
            Ok(s) => Ok(Some(s)),
            Err(e) => {
                debug!(error = %e, "discarding unreadable session file");
                Ok(None)
            }
        }
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(session)?;
        write_private(&self.path, json.as_bytes())
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Writes `contents`, readable by the owner only on unix.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);
    let mut file = options.open(path)?;
    // `mode` only applies on creation; tighten files left by older runs.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)
}

/// Keeps the session in memory only.
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: RwLock<Option<StoredSession>>,
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user_id: Option<String>,
    pub message: String,
}

pub struct Session {
    state: RwLock<AuthState>,
    store: Box<dyn TokenStore>,
    reload: watch::Sender<u64>,
}

impl Session {
    /// Starts logged out; call [`Session::restore`] to pick up a stored token.
    pub fn new(store: Box<dyn TokenStore>) -> Self {
        let (reload, _) = watch::channel(0);
        Self {
            state: RwLock::new(AuthState::LoggedOut),
            store,
            reload,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn token(&self) -> Option<String> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            AuthState::LoggedIn { token, .. } => Some(token.clone()),
            AuthState::LoggedOut => None,
        }
    }

    pub fn user_id(&self) -> Option<String> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            AuthState::LoggedIn { user_id, .. } => user_id.clone(),
            AuthState::LoggedOut => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Number of forced reloads so far.
    pub fn reload_generation(&self) -> u64 {
        *self.reload.borrow()
    }

    pub fn subscribe_reload(&self) -> watch::Receiver<u64> {
        self.reload.subscribe()
    }

    /// Persists a freshly issued token and moves to `LoggedIn`.
    pub fn establish(&self, token: String, user_id: Option<String>) -> Result<()> {
        self.store.save(&StoredSession {
            token: token.clone(),
            user_id: user_id.clone(),
        })?;
        *self.state.write().unwrap_or_else(PoisonError::into_inner) =
            AuthState::LoggedIn { token, user_id };
        Ok(())
    }

    /// Forces `LoggedOut` after the backend rejected the token.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn expire(&self) -> bool {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if *state == AuthState::LoggedOut {
                return false;
            }
            *state = AuthState::LoggedOut;
        }
        if let Err(e) = self.store.clear() {
            debug!(error = %e, "failed to clear stored session");
        }
        self.reload.send_modify(|g| *g += 1);
        info!("session expired; credentials purged");
        true
    }

    fn clear_local(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = AuthState::LoggedOut;
        if let Err(e) = self.store.clear() {
            debug!(error = %e, "failed to clear stored session");
        }
    }

    /// Revalidates a stored token with the backend. Invalid or expired
    /// tokens are purged silently; when validation itself fails the stored
    /// token is left alone. Returns whether the session is live.
    pub async fn restore(&self, client: &ApiClient) -> bool {
        let stored = match self.store.load() {
            Ok(Some(s)) => s,
            Ok(None) => return false,
            Err(e) => {
                debug!(error = %e, "could not load stored session");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        match client.validate_token(&stored.token, &cancel).await {
            Ok(true) => {
                *self.state.write().unwrap_or_else(PoisonError::into_inner) = AuthState::LoggedIn {
                    token: stored.token,
                    user_id: stored.user_id,
                };
                true
            }
            Ok(false) => {
                self.clear_local();
                false
            }
            Err(e) => {
                debug!(error = %e, "token validation failed; keeping stored session");
                *self.state.write().unwrap_or_else(PoisonError::into_inner) = AuthState::LoggedOut;
                false
            }
        }
    }

    pub async fn login(
        &self,
        client: &ApiClient,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome, ApiError> {
        let resp = client.login(password, cancel).await?;
        match resp.token {
            Some(token) if resp.success => {
                self.establish(token, resp.user_id.clone())
                    .map_err(|e| ApiError::Storage(e.to_string()))?;
                Ok(LoginOutcome {
                    user_id: resp.user_id,
                    message: resp.message,
                })
            }
            _ => Err(ApiError::Unauthorized(if resp.message.is_empty() {
                "Invalid password".to_string()
            } else {
                resp.message
            })),
        }
    }

    /// Notifies the backend (best effort) and drops local credentials.
    pub async fn logout(&self, client: &ApiClient) {
        if let Some(token) = self.token() {
            let cancel = CancellationToken::new();
            if let Err(e) = client.logout(&token, &cancel).await {
                debug!(error = %e, "logout notification failed");
            }
        }
        self.clear_local();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expire_fires_once() {
        let session = Session::new(Box::new(MemoryTokenStore::default()));
        assert!(!session.expire());
        assert_eq!(session.reload_generation(), 0);

        session.establish("tok".into(), Some("u1".into())).unwrap();
        assert!(session.is_authenticated());
        assert!(session.expire());
        assert!(!session.expire());
        assert!(!session.expire());
        assert_eq!(session.reload_generation(), 1);
        assert_eq!(session.state(), AuthState::LoggedOut);
    }

    #[test]
    fn test_establish_persists_and_expire_clears() {
        let store = std::sync::Arc::new(MemoryTokenStore::default());
        struct Shared(std::sync::Arc<MemoryTokenStore>);
        impl TokenStore for Shared {
            fn load(&self) -> Result<Option<StoredSession>> {
                self.0.load()
            }
            fn save(&self, s: &StoredSession) -> Result<()> {
                self.0.save(s)
            }
            fn clear(&self) -> Result<()> {
                self.0.clear()
            }
        }

        let session = Session::new(Box::new(Shared(store.clone())));
        session.establish("tok".into(), None).unwrap();
        assert_eq!(store.load().unwrap().unwrap().token, "tok");
        session.expire();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FileTokenStore::new(tmp.path().join("nested").join("session.json"));
        assert!(store.load().unwrap().is_none());

        let s = StoredSession {
            token: "abc".into(),
            user_id: Some("u".into()),
        };
        store.save(&s).unwrap();
        assert_eq!(store.load().unwrap(), Some(s));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileTokenStore::new(path.clone());
        store
            .save(&StoredSession {
                token: "secret-token".into(),
                user_id: None,
            })
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().unwrap().unwrap().token, "secret-token");
    }

    #[tokio::test]
    async fn test_unreachable_backend_keeps_stored_token() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        let stored = StoredSession {
            token: "tok".into(),
            user_id: Some("u1".into()),
        };
        FileTokenStore::new(path.clone()).save(&stored).unwrap();

        let session = std::sync::Arc::new(Session::new(Box::new(FileTokenStore::new(
            path.clone(),
        ))));
        // Nothing listens on port 9.
        let config = crate::config::ClientConfig {
            api_url: "http://127.0.0.1:9/api/v1".into(),
            ..crate::config::ClientConfig::default()
        };
        let client = ApiClient::new(&config, session.clone()).unwrap();

        assert!(!session.restore(&client).await);
        assert_eq!(session.state(), AuthState::LoggedOut);
        assert_eq!(FileTokenStore::new(path).load().unwrap(), Some(stored));
    }

    #[test]
    fn test_corrupt_session_file_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(FileTokenStore::new(path).load().unwrap().is_none());
    }
}
