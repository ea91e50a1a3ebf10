use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::auth::api::{ensure_success, RestAuthBackend};
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{Session, SessionUser};

#[derive(Debug, Serialize)]
struct PasswordGrantRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshGrantRequest<'a> {
    refresh_token: &'a str,
}

/// Session payload returned by the token and sign-up endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: SessionUser,
}

impl TokenResponse {
    pub fn into_session(self) -> AuthResult<Session> {
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            return Err(AuthError::TokenInvalidOrExpired(
                "Backend returned an empty token pair".into(),
            ));
        }
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|seconds| Utc::now().timestamp() + seconds)
        });
        Ok(Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: self.user,
        })
    }
}

pub(crate) async fn password_grant(
    backend: &RestAuthBackend,
    email: &str,
    password: &str,
) -> AuthResult<Session> {
    let request = backend
        .client
        .post(backend.auth_url("token"))
        .query(&[("grant_type", "password")])
        .json(&PasswordGrantRequest { email, password });
    let response: TokenResponse = backend
        .send_json(backend.authorize(request, None))
        .await?;
    response.into_session()
}

pub(crate) async fn refresh_grant(
    backend: &RestAuthBackend,
    refresh_token: &str,
) -> AuthResult<Session> {
    if refresh_token.is_empty() {
        return Err(AuthError::TokenInvalidOrExpired(
            "No refresh token to exchange".into(),
        ));
    }
    let request = backend
        .client
        .post(backend.auth_url("token"))
        .query(&[("grant_type", "refresh_token")])
        .json(&RefreshGrantRequest { refresh_token });
    let response: TokenResponse = backend
        .send_json(backend.authorize(request, None))
        .await?;
    response.into_session()
}

/// Revokes the session. A token the backend no longer recognizes counts as signed out.
pub(crate) async fn logout(backend: &RestAuthBackend, access_token: &str) -> AuthResult<()> {
    let request = backend.client.post(backend.auth_url("logout"));
    let response = backend
        .send(backend.authorize(request, Some(access_token)))
        .await?;
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(()),
        _ => ensure_success(response).await.map(|_| ()),
    }
}
