//! Session recovery at bootstrap and after token corruption.
//!
//! [`SessionRecoveryManager::recover_session`] tries to keep the user signed in by
//! refreshing the persisted session. When the session turns out to be unusable it falls
//! back to [`SessionRecoveryManager::purge_all_auth_artifacts`], which wipes every
//! auth-looking key from every registered storage layer and revokes the session with the
//! backend on a best-effort basis.
//!
//! Purges are serialized through an async mutex, so concurrent calls leave the same
//! persisted state as a single call.

use std::sync::Arc;

use async_lock::Mutex;
use chrono::{Duration as ChronoDuration, Utc};

use crate::auth::client::SharedAuthClient;
use crate::auth::config::StorageConfig;
use crate::auth::error::AuthError;
use crate::auth::model::Session;
use crate::auth::oauth::LoginStateStore;
use crate::auth::persistence::{AuthKeyMatcher, SharedStorage};

const LOG_TARGET: &str = "identity_link::recovery";

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub session: Option<Session>,
    /// True when recovery was skipped because a login redirect is in flight.
    pub deferred: bool,
}

impl RecoveryOutcome {
    fn recovered(session: Session) -> Self {
        Self {
            success: true,
            session: Some(session),
            deferred: false,
        }
    }

    fn failed() -> Self {
        Self {
            success: false,
            session: None,
            deferred: false,
        }
    }

    fn deferred() -> Self {
        Self {
            success: false,
            session: None,
            deferred: true,
        }
    }
}

/// What one purge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// `(layer, key)` pairs that were removed.
    pub removed: Vec<(String, String)>,
    /// Layers or keys that could not be cleared, with the reason.
    pub failures: Vec<String>,
    pub backend_signed_out: bool,
}

impl PurgeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct SessionRecoveryManager {
    client: SharedAuthClient,
    login_state: LoginStateStore,
    layers: Vec<SharedStorage>,
    matcher: AuthKeyMatcher,
    login_attempt_ttl: ChronoDuration,
    purge_lock: Mutex<()>,
}

impl SessionRecoveryManager {
    /// Creates a manager purging the client's primary layer and the login-state layer.
    pub fn new(client: SharedAuthClient, login_state: LoginStateStore, config: &StorageConfig) -> Self {
        let ttl_secs = i64::try_from(config.login_attempt_ttl_secs).unwrap_or(i64::MAX);
        let mut manager = Self {
            layers: Vec::new(),
            matcher: AuthKeyMatcher::new(&config.auth_key_patterns),
            login_attempt_ttl: ChronoDuration::try_seconds(ttl_secs)
                .unwrap_or_else(|| ChronoDuration::minutes(10)),
            purge_lock: Mutex::new(()),
            client,
            login_state,
        };
        let primary = manager.client.storage().clone();
        let flow = manager.login_state.storage().clone();
        manager.register_layer(primary);
        manager.register_layer(flow);
        manager
    }

    /// Adds another persistence layer (cookies, embedded databases, ...) to the purge.
    pub fn with_layer(mut self, layer: SharedStorage) -> Self {
        self.register_layer(layer);
        self
    }

    pub fn layers(&self) -> &[SharedStorage] {
        &self.layers
    }

    fn register_layer(&mut self, layer: SharedStorage) {
        let address = Arc::as_ptr(&layer) as *const ();
        if self
            .layers
            .iter()
            .all(|existing| Arc::as_ptr(existing) as *const () != address)
        {
            self.layers.push(layer);
        }
    }

    pub async fn recover_session(&self) -> RecoveryOutcome {
        if self
            .login_state
            .has_active_login_attempt(self.login_attempt_ttl)
            .await
        {
            log::debug!(target: LOG_TARGET, "login redirect in flight; recovery deferred");
            return RecoveryOutcome::deferred();
        }

        let session = match self.client.get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return RecoveryOutcome::failed(),
            Err(err) => {
                log::warn!(target: LOG_TARGET, "stored session unreadable: {err}");
                self.purge_all_auth_artifacts().await;
                return RecoveryOutcome::failed();
            }
        };

        match self.client.refresh_session(&session).await {
            Ok(refreshed) => RecoveryOutcome::recovered(refreshed),
            Err(err) if err.is_token_failure() => {
                log::warn!(target: LOG_TARGET, "session refresh rejected: {err}");
                self.purge_all_auth_artifacts().await;
                RecoveryOutcome::failed()
            }
            Err(err) => {
                log::warn!(target: LOG_TARGET, "session refresh failed, keeping state: {err}");
                if session.is_expired_at(Utc::now()) {
                    RecoveryOutcome::failed()
                } else {
                    RecoveryOutcome::recovered(session)
                }
            }
        }
    }

    /// Removes every auth artifact this client persisted. Safe to call repeatedly and
    /// concurrently.
    pub async fn purge_all_auth_artifacts(&self) -> PurgeReport {
        let _guard = self.purge_lock.lock().await;
        let mut report = PurgeReport::default();

        let access_token = self.client.current_session().map(|session| session.access_token);
        let access_token = match access_token {
            Some(token) => Some(token),
            None => self.persisted_access_token().await,
        };

        for layer in &self.layers {
            let keys = match layer.keys().await {
                Ok(keys) => keys,
                Err(err) => {
                    report
                        .failures
                        .push(format!("{}: cannot list keys: {err}", layer.name()));
                    continue;
                }
            };
            for key in keys.into_iter().filter(|key| self.matcher.matches(key)) {
                match layer.remove(&key).await {
                    Ok(()) => report.removed.push((layer.name().to_string(), key)),
                    Err(err) => report
                        .failures
                        .push(format!("{}: cannot remove '{key}': {err}", layer.name())),
                }
            }
        }
        self.client.forget_session();

        if let Some(token) = access_token {
            match self.client.backend().sign_out(&token).await {
                Ok(()) => report.backend_signed_out = true,
                Err(err) => log::debug!(target: LOG_TARGET, "server-side sign-out skipped: {err}"),
            }
        }

        if report.removed.is_empty() && report.is_clean() {
            log::debug!(target: LOG_TARGET, "purge found nothing to remove");
        } else {
            log::info!(
                target: LOG_TARGET,
                "purged {} auth artifacts ({} failures)",
                report.removed.len(),
                report.failures.len()
            );
        }
        report
    }

    /// Reacts to an error reported anywhere in the app. Token failures trigger a purge.
    pub async fn handle_error(&self, error: &AuthError) -> Option<PurgeReport> {
        if error.is_token_failure() {
            Some(self.purge_all_auth_artifacts().await)
        } else {
            None
        }
    }

    async fn persisted_access_token(&self) -> Option<String> {
        let raw = self
            .client
            .storage()
            .get(self.client.session_key())
            .await
            .ok()
            .flatten()?;
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        value
            .get("access_token")
            .and_then(|token| token.as_str())
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::auth::client::AuthClient;
    use crate::auth::persistence::{set_json, InMemoryStorage, StorageLayer};
    use crate::test_support::{sample_session, FakeBackend};

    struct Fixture {
        backend: Arc<FakeBackend>,
        local: Arc<InMemoryStorage>,
        cookies: Arc<InMemoryStorage>,
        client: SharedAuthClient,
        manager: SessionRecoveryManager,
    }

    fn fixture() -> Fixture {
        let backend = FakeBackend::shared();
        let local = InMemoryStorage::shared("local");
        let cookies = InMemoryStorage::shared("cookies");
        let config = StorageConfig::default();
        let client = Arc::new(AuthClient::new(backend.clone(), local.clone(), &config));
        let login_state = LoginStateStore::new(local.clone(), &config);
        let manager = SessionRecoveryManager::new(client.clone(), login_state, &config)
            .with_layer(cookies.clone());
        Fixture {
            backend,
            local,
            cookies,
            client,
            manager,
        }
    }

    async fn seed(fixture: &Fixture) {
        fixture.local.set("idlink.auth.session", "{}").await.unwrap();
        fixture.local.set("idlink.auth.oauth.csrf_state", "tok").await.unwrap();
        fixture.local.set("sb-project-auth-token", "x").await.unwrap();
        fixture.local.set("theme", "dark").await.unwrap();
        fixture.cookies.set("access_token", "x").await.unwrap();
        fixture.cookies.set("locale", "zh").await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn layers_are_not_registered_twice() {
        let fixture = fixture();
        assert_eq!(fixture.manager.layers().len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn purge_removes_only_auth_keys_from_every_layer() {
        let fixture = fixture();
        seed(&fixture).await;

        let report = fixture.manager.purge_all_auth_artifacts().await;

        assert_eq!(report.removed.len(), 4);
        assert!(report.is_clean());
        let matcher = AuthKeyMatcher::new(&StorageConfig::default().auth_key_patterns);
        for layer in [&fixture.local, &fixture.cookies] {
            assert!(layer.snapshot().keys().all(|key| !matcher.matches(key)));
        }
        assert_eq!(fixture.local.snapshot().len(), 1);
        assert_eq!(fixture.cookies.snapshot().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn purge_is_idempotent() {
        let fixture = fixture();
        seed(&fixture).await;

        fixture.manager.purge_all_auth_artifacts().await;
        let after_once = (fixture.local.snapshot(), fixture.cookies.snapshot());
        let second = fixture.manager.purge_all_auth_artifacts().await;
        let after_twice = (fixture.local.snapshot(), fixture.cookies.snapshot());

        assert_eq!(after_once, after_twice);
        assert!(second.removed.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_purges_match_a_single_purge() {
        let fixture = fixture();
        seed(&fixture).await;

        let (first, second) = futures::join!(
            fixture.manager.purge_all_auth_artifacts(),
            fixture.manager.purge_all_auth_artifacts()
        );

        assert_eq!(first.removed.len() + second.removed.len(), 4);
        assert_eq!(fixture.local.snapshot().len(), 1);
        assert_eq!(fixture.cookies.snapshot().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn purge_revokes_session_but_tolerates_backend_failure() {
        let fixture = fixture();
        fixture.backend.add_account("a@qq.directory.auth", "pw");
        fixture
            .client
            .sign_in_with_password("a@qq.directory.auth", "pw")
            .await
            .unwrap();
        fixture
            .backend
            .fail_sign_out(AuthError::NetworkUnavailable("offline".into()));

        let report = fixture.manager.purge_all_auth_artifacts().await;

        assert!(!report.backend_signed_out);
        assert!(fixture.client.current_session().is_none());
        assert!(fixture.local.snapshot().is_empty());
        assert_eq!(fixture.backend.sign_out_calls(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn recover_without_session_does_not_purge() {
        let fixture = fixture();
        fixture.cookies.set("access_token", "x").await.unwrap();

        let outcome = fixture.manager.recover_session().await;

        assert!(!outcome.success);
        assert!(!outcome.deferred);
        assert_eq!(fixture.cookies.snapshot().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn recover_refreshes_valid_session() {
        let fixture = fixture();
        fixture.backend.add_account("a@qq.directory.auth", "pw");
        let session = fixture
            .backend
            .issue_session("a@qq.directory.auth")
            .unwrap();
        set_json(fixture.local.as_ref(), "idlink.auth.session", &session)
            .await
            .unwrap();

        let outcome = fixture.manager.recover_session().await;

        assert!(outcome.success);
        let refreshed = outcome.session.unwrap();
        assert_ne!(refreshed.refresh_token, session.refresh_token);
        assert_eq!(fixture.client.current_session(), Some(refreshed));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn corrupt_session_triggers_purge() {
        let fixture = fixture();
        seed(&fixture).await;
        fixture
            .local
            .set("idlink.auth.session", "{\"access_token\": tru")
            .await
            .unwrap();

        let outcome = fixture.manager.recover_session().await;

        assert!(!outcome.success);
        assert_eq!(fixture.local.snapshot().len(), 1);
        assert_eq!(fixture.cookies.snapshot().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejected_refresh_token_triggers_purge() {
        let fixture = fixture();
        set_json(
            fixture.local.as_ref(),
            "idlink.auth.session",
            &sample_session("uid-1", "access-unknown"),
        )
        .await
        .unwrap();

        let outcome = fixture.manager.recover_session().await;

        assert!(!outcome.success);
        assert!(fixture.local.snapshot().is_empty());
        assert_eq!(fixture.backend.refresh_calls(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn network_failure_keeps_unexpired_session() {
        let fixture = fixture();
        let session = sample_session("uid-1", "access-1");
        set_json(fixture.local.as_ref(), "idlink.auth.session", &session)
            .await
            .unwrap();
        fixture
            .backend
            .fail_refresh(AuthError::NetworkUnavailable("offline".into()));

        let outcome = fixture.manager.recover_session().await;

        assert!(outcome.success);
        assert_eq!(outcome.session, Some(session));
        assert_eq!(fixture.local.snapshot().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn active_login_attempt_defers_recovery() {
        let fixture = fixture();
        set_json(
            fixture.local.as_ref(),
            "idlink.auth.session",
            &sample_session("uid-1", "access-1"),
        )
        .await
        .unwrap();
        let login_state = LoginStateStore::new(fixture.local.clone(), &StorageConfig::default());
        login_state.mark_login_attempt("qq").await.unwrap();

        let outcome = fixture.manager.recover_session().await;

        assert!(outcome.deferred);
        assert_eq!(fixture.backend.refresh_calls(), 0);
        assert_eq!(fixture.local.snapshot().len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn token_errors_reported_elsewhere_trigger_purge() {
        let fixture = fixture();
        seed(&fixture).await;

        let ignored = fixture
            .manager
            .handle_error(&AuthError::NetworkUnavailable("offline".into()))
            .await;
        assert!(ignored.is_none());

        let report = fixture
            .manager
            .handle_error(&AuthError::account_link(AuthError::TokenInvalidOrExpired(
                "jwt expired".into(),
            )))
            .await
            .unwrap();
        assert_eq!(report.removed.len(), 4);
    }
}
