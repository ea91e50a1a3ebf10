use serde::{Deserialize, Serialize};

use crate::auth::api::{ensure_success, token, RestAuthBackend, TokenResponse};
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{AccountMetadata, ProfileRecord, Session, SessionUser};

#[derive(Debug, Clone, Serialize)]
pub struct SignUpRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub data: &'a AccountMetadata,
}

/// The sign-up endpoint returns a session when accounts are auto-confirmed and only the
/// user record otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SignUpResponse {
    Session(TokenResponse),
    User(SessionUser),
}

#[derive(Debug, Serialize)]
struct UpdatePasswordRequest<'a> {
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct ExistsRequest<'a> {
    provider: &'a str,
    external_id: &'a str,
}

pub(crate) async fn sign_up(
    backend: &RestAuthBackend,
    email: &str,
    password: &str,
    metadata: &AccountMetadata,
) -> AuthResult<Session> {
    let body = SignUpRequest {
        email,
        password,
        data: metadata,
    };
    let request = backend.client.post(backend.auth_url("signup")).json(&body);
    let response: SignUpResponse = backend
        .send_json(backend.authorize(request, None))
        .await?;

    match response {
        SignUpResponse::Session(tokens) => tokens.into_session(),
        SignUpResponse::User(user) => {
            log::debug!(
                target: "identity_link::api",
                "sign-up for {} returned no session; signing in",
                user.id
            );
            token::password_grant(backend, email, password).await
        }
    }
}

pub(crate) async fn update_password(
    backend: &RestAuthBackend,
    session: &Session,
    new_password: &str,
) -> AuthResult<()> {
    let request = backend
        .client
        .put(backend.auth_url("user"))
        .json(&UpdatePasswordRequest {
            password: new_password,
        });
    let response = backend
        .send(backend.authorize(request, Some(&session.access_token)))
        .await?;
    ensure_success(response).await.map(|_| ())
}

pub(crate) async fn account_exists_for_external_id(
    backend: &RestAuthBackend,
    provider: &str,
    external_id: &str,
) -> AuthResult<bool> {
    let path = format!("rpc/{}", backend.config.exists_rpc);
    let request = backend.client.post(backend.rest_url(&path)).json(&ExistsRequest {
        provider,
        external_id,
    });
    let value: serde_json::Value = backend
        .send_json(backend.authorize(request, None))
        .await?;
    value.as_bool().ok_or_else(|| {
        AuthError::Internal(format!(
            "{} returned a non-boolean payload: {value}",
            backend.config.exists_rpc
        ))
    })
}

pub(crate) async fn insert_profile(
    backend: &RestAuthBackend,
    session: &Session,
    profile: &ProfileRecord,
) -> AuthResult<()> {
    let request = backend
        .client
        .post(backend.rest_url(&backend.config.profile_table))
        .header("Prefer", "return=minimal")
        .json(profile);
    let response = backend
        .send(backend.authorize(request, Some(&session.access_token)))
        .await?;
    ensure_success(response).await.map(|_| ())
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::auth::api::AuthBackend;
    use crate::auth::model::IdentityTrust;
    use crate::test_support::{rest_backend, sample_session, start_mock_server};
    use httpmock::prelude::*;
    use serde_json::json;

    fn metadata() -> AccountMetadata {
        AccountMetadata {
            display_name: "Alice".into(),
            avatar_url: "https://cdn.example/a.png".into(),
            external_id: "ext123".into(),
            provider: "qq".into(),
            identity_trust: IdentityTrust::Verified,
            credential_scheme: "v2-sha256".into(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sign_up_embeds_metadata() {
        let server = start_mock_server();
        let backend = rest_backend(&server);

        let mock = server.mock(|when, then| {
            when.method(POST).path("/auth/v1/signup").json_body(json!({
                "email": "ext123@qq.directory.auth",
                "password": "pw",
                "data": {
                    "display_name": "Alice",
                    "avatar_url": "https://cdn.example/a.png",
                    "external_id": "ext123",
                    "provider": "qq",
                    "identity_trust": "verified",
                    "credential_scheme": "v2-sha256"
                }
            }));
            then.status(200).json_body(json!({
                "access_token": "access-new",
                "refresh_token": "refresh-new",
                "expires_in": 3600,
                "user": { "id": "uid-new" }
            }));
        });

        let session = backend
            .sign_up("ext123@qq.directory.auth", "pw", &metadata())
            .await
            .unwrap();

        mock.assert();
        assert_eq!(session.user_id(), "uid-new");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sign_up_without_session_falls_through_to_sign_in() {
        let server = start_mock_server();
        let backend = rest_backend(&server);

        let signup = server.mock(|when, then| {
            when.method(POST).path("/auth/v1/signup");
            then.status(200)
                .json_body(json!({ "id": "uid-new", "email": "ext123@qq.directory.auth" }));
        });
        let token = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/v1/token")
                .query_param("grant_type", "password");
            then.status(200).json_body(json!({
                "access_token": "access-new",
                "refresh_token": "refresh-new",
                "user": { "id": "uid-new" }
            }));
        });

        let session = backend
            .sign_up("ext123@qq.directory.auth", "pw", &metadata())
            .await
            .unwrap();

        signup.assert();
        token.assert();
        assert_eq!(session.access_token, "access-new");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn existence_check_reads_boolean() {
        let server = start_mock_server();
        let backend = rest_backend(&server);

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/rest/v1/rpc/account_exists_for_external_id")
                .json_body(json!({ "provider": "qq", "external_id": "ext123" }));
            then.status(200).json_body(json!(true));
        });

        assert!(backend
            .account_exists_for_external_id("qq", "ext123")
            .await
            .unwrap());
        mock.assert();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn insert_profile_uses_session_token() {
        let server = start_mock_server();
        let backend = rest_backend(&server);
        let session = sample_session("uid-1", "access-1");

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/rest/v1/profiles")
                .header("authorization", "Bearer access-1")
                .header("prefer", "return=minimal");
            then.status(201);
        });

        let identity = crate::auth::model::ExternalIdentity::new("qq", "ext123", "Alice", "a.png");
        backend
            .insert_profile(&session, &ProfileRecord::for_identity("uid-1", &identity))
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_password_sends_put() {
        let server = start_mock_server();
        let backend = rest_backend(&server);
        let session = sample_session("uid-1", "access-1");

        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/auth/v1/user")
                .header("authorization", "Bearer access-1")
                .json_body(json!({ "password": "new-secret" }));
            then.status(200).json_body(json!({ "id": "uid-1" }));
        });

        backend.update_password(&session, "new-secret").await.unwrap();
        mock.assert();
    }
}
