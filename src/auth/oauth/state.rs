use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::config::StorageConfig;
use crate::auth::error::AuthResult;
use crate::auth::persistence::{get_json, set_json, SharedStorage};

const LOG_TARGET: &str = "identity_link::oauth";

/// Transient flag written before redirecting to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptMarker {
    pub provider: String,
    pub started_at: DateTime<Utc>,
}

impl LoginAttemptMarker {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            started_at: Utc::now(),
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>, ttl: ChronoDuration) -> bool {
        self.started_at <= now && now - self.started_at < ttl
    }
}

/// CSRF token and origin path read back (and deleted) when the provider redirects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrfState {
    pub token: Option<String>,
    pub origin_path: Option<String>,
}

/// Single-use login-flow keys in client storage.
///
/// All keys live under `{prefix}.oauth.*` so the recovery purge's auth patterns cover
/// them. Every write tolerates being clobbered by a concurrent purge: a missing key reads
/// back as "nothing stored".
#[derive(Clone)]
pub struct LoginStateStore {
    storage: SharedStorage,
    csrf_key: String,
    origin_key: String,
    attempt_key: String,
}

impl LoginStateStore {
    pub fn new(storage: SharedStorage, config: &StorageConfig) -> Self {
        Self {
            storage,
            csrf_key: config.key("oauth.csrf_state"),
            origin_key: config.key("oauth.origin_path"),
            attempt_key: config.key("oauth.login_attempt"),
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub async fn save_csrf_state(&self, token: &str, origin_path: Option<&str>) -> AuthResult<()> {
        self.storage.set(&self.csrf_key, token).await?;
        match origin_path {
            Some(path) => self.storage.set(&self.origin_key, path).await,
            None => self.storage.remove(&self.origin_key).await,
        }
    }

    /// Reads and deletes the stored CSRF token and origin path.
    ///
    /// Both keys are removed even when reading one of them fails.
    pub async fn take_csrf_state(&self) -> AuthResult<CsrfState> {
        let token = self.storage.get(&self.csrf_key).await;
        let origin_path = self.storage.get(&self.origin_key).await;
        let removed_token = self.storage.remove(&self.csrf_key).await;
        let removed_origin = self.storage.remove(&self.origin_key).await;
        removed_token?;
        removed_origin?;

        Ok(CsrfState {
            token: token?.filter(|value| !value.is_empty()),
            origin_path: origin_path?.filter(|value| !value.is_empty()),
        })
    }

    pub async fn mark_login_attempt(&self, provider: &str) -> AuthResult<()> {
        set_json(
            self.storage.as_ref(),
            &self.attempt_key,
            &LoginAttemptMarker::new(provider),
        )
        .await
    }

    pub async fn clear_login_attempt(&self) -> AuthResult<()> {
        self.storage.remove(&self.attempt_key).await
    }

    /// Returns the stored marker. An unreadable marker is discarded and reported absent.
    pub async fn login_attempt(&self) -> Option<LoginAttemptMarker> {
        match get_json(self.storage.as_ref(), &self.attempt_key).await {
            Ok(marker) => marker,
            Err(err) => {
                log::warn!(target: LOG_TARGET, "discarding login attempt marker: {err}");
                let _ = self.storage.remove(&self.attempt_key).await;
                None
            }
        }
    }

    pub async fn has_active_login_attempt(&self, ttl: ChronoDuration) -> bool {
        self.login_attempt()
            .await
            .map(|marker| marker.is_active_at(Utc::now(), ttl))
            .unwrap_or(false)
    }
}
