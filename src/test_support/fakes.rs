//! In-memory stand-ins for the hosted backend and the provider SDK.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::auth::api::AuthBackend;
use crate::auth::config::ProviderConfig;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{AccountMetadata, IdentityTrust, ProfileRecord, Session, SessionUser};
use crate::auth::oauth::AuthorizationGrant;
use crate::auth::sdk::{ProviderSdkClient, SdkHost, SdkUserInfo, SharedSdkClient};
use crate::platform::runtime;

#[derive(Debug, Clone)]
pub struct FakeAccount {
    pub user_id: String,
    pub password: String,
    pub metadata: AccountMetadata,
}

#[derive(Default)]
struct BackendState {
    accounts: BTreeMap<String, FakeAccount>,
    refresh_tokens: BTreeMap<String, String>,
    profiles: Vec<ProfileRecord>,
    sign_in_attempts: Vec<(String, String)>,
    sign_up_calls: usize,
    update_password_calls: usize,
    refresh_calls: usize,
    sign_out_calls: usize,
    issued: usize,
    fail_sign_in: Option<AuthError>,
    fail_update_password: Option<AuthError>,
    fail_refresh: Option<AuthError>,
    fail_sign_out: Option<AuthError>,
    fail_existence_check: Option<AuthError>,
    fail_insert_profile: Option<AuthError>,
    register_on_check: Option<(String, String, String, String)>,
}

impl BackendState {
    fn insert_account(&mut self, email: &str, password: &str, metadata: AccountMetadata) {
        let user_id = format!("uid-{}", self.accounts.len() + 1);
        self.accounts.insert(
            email.to_string(),
            FakeAccount {
                user_id,
                password: password.to_string(),
                metadata,
            },
        );
    }

    fn issue_session(&mut self, email: &str) -> Option<Session> {
        let account = self.accounts.get(email)?.clone();
        self.issued += 1;
        let serial = self.issued;
        let session = Session {
            access_token: format!("access-{}-{serial}", account.user_id),
            refresh_token: format!("refresh-{}-{serial}", account.user_id),
            token_type: "bearer".to_string(),
            expires_at: Some(Utc::now().timestamp() + 3600),
            user: SessionUser {
                id: account.user_id.clone(),
                email: Some(email.to_string()),
                user_metadata: serde_json::to_value(&account.metadata).unwrap_or_default(),
            },
        };
        self.refresh_tokens
            .insert(session.refresh_token.clone(), email.to_string());
        Some(session)
    }
}

fn linked_metadata(provider: &str, external_id: &str) -> AccountMetadata {
    AccountMetadata {
        display_name: external_id.to_string(),
        avatar_url: String::new(),
        external_id: external_id.to_string(),
        provider: provider.to_string(),
        identity_trust: IdentityTrust::Verified,
        credential_scheme: "v2-sha256".to_string(),
    }
}

/// [`AuthBackend`] keeping accounts, sessions and profile rows in memory.
///
/// `fail_*` setters make the next call of that operation fail once.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_account(&self, email: &str, password: &str) {
        let local = email.split('@').next().unwrap_or(email);
        self.state
            .lock()
            .unwrap()
            .insert_account(email, password, linked_metadata("qq", local));
    }

    pub fn add_linked_account(&self, email: &str, password: &str, provider: &str, external_id: &str) {
        self.state
            .lock()
            .unwrap()
            .insert_account(email, password, linked_metadata(provider, external_id));
    }

    /// The next existence check answers `false` and then registers the account, as if a
    /// second tab won the registration race.
    pub fn register_during_next_existence_check(
        &self,
        email: &str,
        password: &str,
        provider: &str,
        external_id: &str,
    ) {
        self.state.lock().unwrap().register_on_check = Some((
            email.to_string(),
            password.to_string(),
            provider.to_string(),
            external_id.to_string(),
        ));
    }

    pub fn issue_session(&self, email: &str) -> Option<Session> {
        self.state.lock().unwrap().issue_session(email)
    }

    pub fn account(&self, email: &str) -> Option<FakeAccount> {
        self.state.lock().unwrap().accounts.get(email).cloned()
    }

    pub fn account_count(&self) -> usize {
        self.state.lock().unwrap().accounts.len()
    }

    pub fn password_of(&self, email: &str) -> Option<String> {
        self.account(email).map(|account| account.password)
    }

    pub fn profiles(&self) -> Vec<ProfileRecord> {
        self.state.lock().unwrap().profiles.clone()
    }

    pub fn sign_in_attempts(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sign_in_attempts.clone()
    }

    pub fn sign_up_calls(&self) -> usize {
        self.state.lock().unwrap().sign_up_calls
    }

    pub fn update_password_calls(&self) -> usize {
        self.state.lock().unwrap().update_password_calls
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }

    pub fn sign_out_calls(&self) -> usize {
        self.state.lock().unwrap().sign_out_calls
    }

    pub fn fail_sign_in(&self, error: AuthError) {
        self.state.lock().unwrap().fail_sign_in = Some(error);
    }

    pub fn fail_update_password(&self, error: AuthError) {
        self.state.lock().unwrap().fail_update_password = Some(error);
    }

    pub fn fail_refresh(&self, error: AuthError) {
        self.state.lock().unwrap().fail_refresh = Some(error);
    }

    pub fn fail_sign_out(&self, error: AuthError) {
        self.state.lock().unwrap().fail_sign_out = Some(error);
    }

    pub fn fail_existence_check(&self, error: AuthError) {
        self.state.lock().unwrap().fail_existence_check = Some(error);
    }

    pub fn fail_insert_profile(&self, error: AuthError) {
        self.state.lock().unwrap().fail_insert_profile = Some(error);
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl AuthBackend for FakeBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let mut state = self.state.lock().unwrap();
        state
            .sign_in_attempts
            .push((email.to_string(), password.to_string()));
        if let Some(error) = state.fail_sign_in.take() {
            return Err(error);
        }
        match state.accounts.get(email) {
            Some(account) if account.password == password => {}
            _ => {
                return Err(AuthError::InvalidCredentials(format!(
                    "Invalid login credentials (rejected '{password}')"
                )))
            }
        }
        state
            .issue_session(email)
            .ok_or_else(|| AuthError::Internal("account vanished".into()))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &AccountMetadata,
    ) -> AuthResult<Session> {
        let mut state = self.state.lock().unwrap();
        state.sign_up_calls += 1;
        if state.accounts.contains_key(email) {
            return Err(AuthError::AccountLinkConflict(
                "user_already_exists: User already registered".into(),
            ));
        }
        state.insert_account(email, password, metadata.clone());
        state
            .issue_session(email)
            .ok_or_else(|| AuthError::Internal("account vanished".into()))
    }

    async fn update_password(&self, session: &Session, new_password: &str) -> AuthResult<()> {
        let mut state = self.state.lock().unwrap();
        state.update_password_calls += 1;
        if let Some(error) = state.fail_update_password.take() {
            return Err(error);
        }
        let account = state
            .accounts
            .values_mut()
            .find(|account| account.user_id == session.user.id)
            .ok_or_else(|| AuthError::TokenInvalidOrExpired("unknown user".into()))?;
        account.password = new_password.to_string();
        Ok(())
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session> {
        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;
        if let Some(error) = state.fail_refresh.take() {
            return Err(error);
        }
        let email = state.refresh_tokens.remove(refresh_token).ok_or_else(|| {
            AuthError::TokenInvalidOrExpired("Invalid Refresh Token: Refresh Token Not Found".into())
        })?;
        state
            .issue_session(&email)
            .ok_or_else(|| AuthError::TokenInvalidOrExpired("user not found".into()))
    }

    async fn sign_out(&self, _access_token: &str) -> AuthResult<()> {
        let mut state = self.state.lock().unwrap();
        state.sign_out_calls += 1;
        match state.fail_sign_out.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn account_exists_for_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> AuthResult<bool> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_existence_check.take() {
            return Err(error);
        }
        if let Some((email, password, provider, external_id)) = state.register_on_check.take() {
            let metadata = linked_metadata(&provider, &external_id);
            state.insert_account(&email, &password, metadata);
            return Ok(false);
        }
        Ok(state.accounts.values().any(|account| {
            account.metadata.provider == provider && account.metadata.external_id == external_id
        }))
    }

    async fn insert_profile(&self, _session: &Session, profile: &ProfileRecord) -> AuthResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_insert_profile.take() {
            return Err(error);
        }
        state.profiles.push(profile.clone());
        Ok(())
    }
}

/// Scriptable [`ProviderSdkClient`]. Clones share their call counters.
#[derive(Clone)]
pub struct FakeSdkClient {
    response: SdkUserInfo,
    delay: Duration,
    user_info_calls: Arc<AtomicUsize>,
    login_urls: Arc<Mutex<Vec<String>>>,
}

impl FakeSdkClient {
    pub fn returning(open_id: &str, nickname: &str) -> Self {
        Self::with_response(SdkUserInfo {
            ret: 0,
            nickname: nickname.to_string(),
            avatar_url: Some(format!("https://q.example/{open_id}.png")),
            open_id: Some(open_id.to_string()),
            ..Default::default()
        })
    }

    pub fn failing_with_ret(ret: i64) -> Self {
        Self::with_response(SdkUserInfo {
            ret,
            msg: "provider rejected the call".to_string(),
            ..Default::default()
        })
    }

    fn with_response(response: SdkUserInfo) -> Self {
        Self {
            response,
            delay: Duration::ZERO,
            user_info_calls: Arc::new(AtomicUsize::new(0)),
            login_urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn user_info_calls(&self) -> usize {
        self.user_info_calls.load(Ordering::SeqCst)
    }

    pub fn login_urls(&self) -> Vec<String> {
        self.login_urls.lock().unwrap().clone()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ProviderSdkClient for FakeSdkClient {
    fn is_ready(&self) -> bool {
        true
    }

    async fn get_user_info(&self, _grant: &AuthorizationGrant) -> AuthResult<SdkUserInfo> {
        self.user_info_calls.fetch_add(1, Ordering::SeqCst);
        runtime::sleep(self.delay).await;
        Ok(self.response.clone())
    }

    async fn login(&self, authorize_url: &str) -> AuthResult<bool> {
        self.login_urls.lock().unwrap().push(authorize_url.to_string());
        Ok(true)
    }
}

/// Scriptable [`SdkHost`].
pub struct FakeSdkHost {
    present: bool,
    appears_after: Option<usize>,
    inject_fails: bool,
    blocked: bool,
    injected: AtomicBool,
    polls: AtomicUsize,
    inject_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    client: FakeSdkClient,
}

impl FakeSdkHost {
    fn build(present: bool, appears_after: Option<usize>, inject_fails: bool, blocked: bool) -> Self {
        Self {
            present,
            appears_after,
            inject_fails,
            blocked,
            injected: AtomicBool::new(false),
            polls: AtomicUsize::new(0),
            inject_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            client: FakeSdkClient::returning("OPEN-DEFAULT", "Default"),
        }
    }

    /// SDK global already on the page.
    pub fn ready() -> Arc<Self> {
        Arc::new(Self::build(true, None, false, false))
    }

    pub fn ready_with(client: FakeSdkClient) -> Arc<Self> {
        let mut host = Self::build(true, None, false, false);
        host.client = client;
        Arc::new(host)
    }

    /// Script loads and the global shows up on the `polls`-th readiness check.
    pub fn appears_after(polls: usize) -> Arc<Self> {
        Arc::new(Self::build(false, Some(polls), false, false))
    }

    /// Script load fails; `blocked` decides what the ad-blocker probe reports.
    pub fn failing(blocked: bool) -> Arc<Self> {
        Arc::new(Self::build(false, None, true, blocked))
    }

    pub fn inject_calls(&self) -> usize {
        self.inject_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn client_user_info_calls(&self) -> usize {
        self.client.user_info_calls()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SdkHost for FakeSdkHost {
    fn sdk_present(&self, _config: &ProviderConfig) -> bool {
        if self.present {
            return true;
        }
        match self.appears_after {
            Some(threshold) if self.injected.load(Ordering::SeqCst) => {
                self.polls.fetch_add(1, Ordering::SeqCst) + 1 >= threshold
            }
            _ => false,
        }
    }

    async fn inject_script(&self, config: &ProviderConfig) -> AuthResult<()> {
        self.inject_calls.fetch_add(1, Ordering::SeqCst);
        if self.inject_fails {
            return Err(AuthError::SdkLoadFailure(format!(
                "Failed to load provider script: {}",
                config.sdk_script_url
            )));
        }
        self.injected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn client(&self, _config: &ProviderConfig) -> Option<SharedSdkClient> {
        let client: SharedSdkClient = Arc::new(self.client.clone());
        Some(client)
    }

    async fn ad_probe_collapsed(&self) -> bool {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.blocked
    }
}
