use std::sync::{Arc, Mutex};

use crate::auth::api::SharedBackend;
use crate::auth::config::StorageConfig;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{AccountMetadata, Session};
use crate::auth::persistence::{get_json, set_json, SharedStorage};

const LOG_TARGET: &str = "identity_link::client";

/// Session-bearing facade over the hosted backend.
///
/// Every successful sign-in, sign-up and refresh is written to the primary storage
/// layer under [`StorageConfig::session_key`]. Persisting is best effort: a failed write
/// is logged and the in-memory session stays authoritative for this process.
pub struct AuthClient {
    backend: SharedBackend,
    storage: SharedStorage,
    session_key: String,
    current: Mutex<Option<Session>>,
}

impl AuthClient {
    pub fn new(backend: SharedBackend, storage: SharedStorage, config: &StorageConfig) -> Self {
        Self {
            backend,
            storage,
            session_key: config.session_key(),
            current: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Returns the in-memory session, if any, without touching storage.
    pub fn current_session(&self) -> Option<Session> {
        self.current.lock().unwrap().clone()
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let session = self.backend.sign_in_with_password(email, password).await?;
        self.install_session(&session).await;
        Ok(session)
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &AccountMetadata,
    ) -> AuthResult<Session> {
        let session = self.backend.sign_up(email, password, metadata).await?;
        self.install_session(&session).await;
        Ok(session)
    }

    /// Loads the current session, falling back to the persisted copy.
    ///
    /// Fails with [`AuthError::Storage`] when the persisted payload cannot be read or
    /// parsed, which callers treat as corruption.
    pub async fn get_session(&self) -> AuthResult<Option<Session>> {
        if let Some(session) = self.current_session() {
            return Ok(Some(session));
        }
        let persisted: Option<Session> = get_json(self.storage.as_ref(), &self.session_key).await?;
        if let Some(session) = persisted.as_ref() {
            if session.access_token.is_empty() || session.refresh_token.is_empty() {
                return Err(AuthError::Storage(
                    "Persisted session is missing its token pair".into(),
                ));
            }
            *self.current.lock().unwrap() = Some(session.clone());
        }
        Ok(persisted)
    }

    /// Exchanges the session's refresh token for a new token pair.
    pub async fn refresh_session(&self, session: &Session) -> AuthResult<Session> {
        let refreshed = self.backend.refresh_session(&session.refresh_token).await?;
        self.install_session(&refreshed).await;
        Ok(refreshed)
    }

    /// Revokes the session server-side (best effort) and clears local state.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let session = self.current_session();
        self.clear_local_session().await?;
        if let Some(session) = session {
            if let Err(err) = self.backend.sign_out(&session.access_token).await {
                log::warn!(target: LOG_TARGET, "server-side sign-out failed: {err}");
            }
        }
        Ok(())
    }

    /// Drops the in-memory session and the persisted copy.
    pub async fn clear_local_session(&self) -> AuthResult<()> {
        self.current.lock().unwrap().take();
        self.storage.remove(&self.session_key).await
    }

    /// Forgets the in-memory session only; used by the purge after storage is wiped.
    pub(crate) fn forget_session(&self) {
        self.current.lock().unwrap().take();
    }

    async fn install_session(&self, session: &Session) {
        *self.current.lock().unwrap() = Some(session.clone());
        if let Err(err) = set_json(self.storage.as_ref(), &self.session_key, session).await {
            log::warn!(target: LOG_TARGET, "failed to persist session: {err}");
        }
    }
}

pub type SharedAuthClient = Arc<AuthClient>;
