use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

mod account;
pub mod token;

use crate::auth::config::BackendConfig;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{AccountMetadata, ProfileRecord, Session};
use crate::platform::runtime;

pub use account::{SignUpRequest, SignUpResponse};
pub use token::TokenResponse;

/// The hosted auth/data service as seen by the identity-link flow.
///
/// The crate ships [`RestAuthBackend`]; tests and alternative transports provide their
/// own implementations.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait AuthBackend: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &AccountMetadata,
    ) -> AuthResult<Session>;

    /// Rewrites the signed-in account's password.
    async fn update_password(&self, session: &Session, new_password: &str) -> AuthResult<()>;

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session>;

    /// Invalidates the session server-side.
    async fn sign_out(&self, access_token: &str) -> AuthResult<()>;

    /// Single authoritative lookup for an account linked to `(provider, external_id)`.
    async fn account_exists_for_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> AuthResult<bool>;

    async fn insert_profile(&self, session: &Session, profile: &ProfileRecord) -> AuthResult<()>;
}

pub type SharedBackend = Arc<dyn AuthBackend>;

/// [`AuthBackend`] over the backend's REST endpoints.
#[derive(Clone)]
pub struct RestAuthBackend {
    client: Client,
    config: BackendConfig,
}

impl RestAuthBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: BackendConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub(crate) fn auth_url(&self, path: &str) -> String {
        join_url(&self.config.auth_url, path)
    }

    pub(crate) fn rest_url(&self, path: &str) -> String {
        join_url(&self.config.rest_url, path)
    }

    /// Adds the project key and bearer token (the project key when no session).
    pub(crate) fn authorize(&self, request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer.unwrap_or(&self.config.api_key))
    }

    pub(crate) async fn send(&self, request: RequestBuilder) -> AuthResult<Response> {
        bounded(self.config.request_timeout(), async move {
            request
                .send()
                .await
                .map_err(|err| AuthError::NetworkUnavailable(err.to_string()))
        })
        .await
    }

    pub(crate) async fn send_json<T>(&self, request: RequestBuilder) -> AuthResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.send(request).await?;
        let response = ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| AuthError::NetworkUnavailable(format!("Malformed backend response: {err}")))
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl AuthBackend for RestAuthBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        token::password_grant(self, email, password).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &AccountMetadata,
    ) -> AuthResult<Session> {
        account::sign_up(self, email, password, metadata).await
    }

    async fn update_password(&self, session: &Session, new_password: &str) -> AuthResult<()> {
        account::update_password(self, session, new_password).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session> {
        token::refresh_grant(self, refresh_token).await
    }

    async fn sign_out(&self, access_token: &str) -> AuthResult<()> {
        token::logout(self, access_token).await
    }

    async fn account_exists_for_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> AuthResult<bool> {
        account::account_exists_for_external_id(self, provider, external_id).await
    }

    async fn insert_profile(&self, session: &Session, profile: &ProfileRecord) -> AuthResult<()> {
        account::insert_profile(self, session, profile).await
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn bounded<T, F>(duration: std::time::Duration, future: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    runtime::timeout(duration, future)
        .await
        .unwrap_or_else(|elapsed| Err(AuthError::NetworkUnavailable(format!("Backend request timed out: {elapsed}"))))
}

pub(crate) async fn ensure_success(response: Response) -> AuthResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(map_backend_error(status, &body))
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn summary(&self) -> String {
        [
            self.error_code.as_deref(),
            self.error.as_deref(),
            self.error_description.as_deref(),
            self.msg.as_deref(),
            self.message.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(": ")
    }
}

const CREDENTIAL_SIGNATURES: &[&str] = &["invalid login credentials", "invalid_credentials"];
const CONFLICT_SIGNATURES: &[&str] = &[
    "already registered",
    "user_already_exists",
    "already exists",
    "duplicate key",
];
const TOKEN_SIGNATURES: &[&str] = &[
    "jwt",
    "refresh token",
    "refresh_token",
    "invalid token",
    "token is expired",
    "session_not_found",
    "bad_jwt",
];

/// Classifies a non-success backend response into the error taxonomy.
pub(crate) fn map_backend_error(status: StatusCode, body: &str) -> AuthError {
    let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
    let summary = match parsed.summary() {
        summary if summary.is_empty() => body.trim().to_string(),
        summary => summary,
    };
    let haystack = summary.to_ascii_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|needle| haystack.contains(needle));

    if contains_any(CREDENTIAL_SIGNATURES) {
        return AuthError::InvalidCredentials(summary);
    }
    if status == StatusCode::CONFLICT || contains_any(CONFLICT_SIGNATURES) {
        return AuthError::AccountLinkConflict(summary);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || contains_any(TOKEN_SIGNATURES)
    {
        return AuthError::TokenInvalidOrExpired(summary);
    }
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return AuthError::NetworkUnavailable(format!(
            "Backend returned HTTP {status}: {summary}"
        ));
    }
    AuthError::Internal(format!("Backend returned HTTP {status}: {summary}"))
}
