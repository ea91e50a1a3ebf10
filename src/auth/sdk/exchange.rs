//! Server-side identity exchange against the provider's graph API.
//!
//! Trades the authorization code for an access token, the token for the user's open id,
//! and both for the public profile. The provider answers in three different shapes
//! depending on the endpoint and the `fmt` parameter: plain JSON, form-encoded pairs, or
//! JSONP wrapped in `callback( ... );`. All three are accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::config::ProviderConfig;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::oauth::AuthorizationGrant;
use crate::auth::sdk::{ProviderSdkClient, SdkHost, SdkUserInfo, SharedSdkClient};
use crate::platform::runtime;

const LOG_TARGET: &str = "identity_link::exchange";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub token_endpoint: String,
    pub openid_endpoint: String,
    pub user_info_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub request_timeout_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            token_endpoint: "https://graph.qq.com/oauth2.0/token".to_string(),
            openid_endpoint: "https://graph.qq.com/oauth2.0/me".to_string(),
            user_info_endpoint: "https://graph.qq.com/user/get_user_info".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ExchangeConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            ..Default::default()
        }
    }

    /// Points all three endpoints at `base` (`{base}/oauth2.0/token`, ...).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.token_endpoint = format!("{base}/oauth2.0/token");
        self.openid_endpoint = format!("{base}/oauth2.0/me");
        self.user_info_endpoint = format!("{base}/user/get_user_info");
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Trimmed profile returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangedProfile {
    pub open_id: String,
    pub nickname: String,
    pub gender: Option<String>,
    pub avatar_url: String,
}

impl ExchangedProfile {
    pub fn into_user_info(self) -> SdkUserInfo {
        SdkUserInfo {
            ret: 0,
            msg: String::new(),
            nickname: self.nickname,
            avatar_url: Some(self.avatar_url).filter(|url| !url.is_empty()),
            avatar_url_small: None,
            open_id: Some(self.open_id),
            gender: self.gender,
        }
    }
}

#[derive(Clone)]
pub struct GraphExchangeClient {
    client: Client,
    config: ExchangeConfig,
}

impl GraphExchangeClient {
    pub fn new(config: ExchangeConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: ExchangeConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Runs the full code → token → open id → profile chain.
    pub async fn exchange(&self, grant: &AuthorizationGrant) -> AuthResult<ExchangedProfile> {
        let access_token = self.exchange_code(grant).await?;
        let open_id = self.fetch_open_id(&access_token).await?;
        self.fetch_profile(&access_token, &open_id).await
    }

    pub async fn exchange_code(&self, grant: &AuthorizationGrant) -> AuthResult<String> {
        let redirect_uri = if grant.redirect_uri.is_empty() {
            self.config.redirect_uri.as_str()
        } else {
            grant.redirect_uri.as_str()
        };
        let request = self.client.get(&self.config.token_endpoint).query(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", grant.code.as_str()),
            ("redirect_uri", redirect_uri),
            ("fmt", "json"),
        ]);
        let payload = self.fetch(request).await?;
        string_field(&payload, "access_token").ok_or_else(|| {
            AuthError::ProviderError {
                code: "missing_access_token".into(),
                description: Some("token endpoint returned no access_token".into()),
            }
        })
    }

    pub async fn fetch_open_id(&self, access_token: &str) -> AuthResult<String> {
        let request = self
            .client
            .get(&self.config.openid_endpoint)
            .query(&[("access_token", access_token), ("fmt", "json")]);
        let payload = self.fetch(request).await?;
        string_field(&payload, "openid").ok_or_else(|| AuthError::ProviderError {
            code: "missing_openid".into(),
            description: Some("openid endpoint returned no openid".into()),
        })
    }

    pub async fn fetch_profile(&self, access_token: &str, open_id: &str) -> AuthResult<ExchangedProfile> {
        let request = self.client.get(&self.config.user_info_endpoint).query(&[
            ("access_token", access_token),
            ("oauth_consumer_key", self.config.client_id.as_str()),
            ("openid", open_id),
        ]);
        let payload = self.fetch(request).await?;
        let mut info: SdkUserInfo = serde_json::from_value(Value::Object(payload))
            .map_err(|err| AuthError::ProviderError {
                code: "malformed_user_info".into(),
                description: Some(err.to_string()),
            })?;
        if info.ret != 0 {
            return Err(AuthError::ProviderError {
                code: info.ret.to_string(),
                description: Some(info.msg).filter(|msg| !msg.is_empty()),
            });
        }
        info.open_id = Some(open_id.to_string());

        let avatar_url = info
            .avatar_url
            .take()
            .filter(|url| !url.is_empty())
            .or(info.avatar_url_small.take())
            .unwrap_or_default();
        Ok(ExchangedProfile {
            open_id: open_id.to_string(),
            nickname: info.nickname.trim().to_string(),
            gender: info.gender.filter(|gender| !gender.is_empty()),
            avatar_url,
        })
    }

    async fn fetch(&self, request: RequestBuilder) -> AuthResult<Map<String, Value>> {
        let response = runtime::timeout(self.config.request_timeout(), request.send())
            .await
            .map_err(|elapsed| {
                AuthError::NetworkUnavailable(format!("provider request timed out: {elapsed}"))
            })?
            .map_err(|err| AuthError::NetworkUnavailable(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AuthError::NetworkUnavailable(err.to_string()))?;

        if status.is_server_error() {
            return Err(AuthError::NetworkUnavailable(format!(
                "provider returned HTTP {status}"
            )));
        }
        let payload = parse_provider_payload(&body)?;
        if let Some(code) = payload.get("error").filter(|value| !value.is_null()) {
            return Err(AuthError::ProviderError {
                code: value_to_string(code),
                description: string_field(&payload, "error_description"),
            });
        }
        if !status.is_success() {
            return Err(AuthError::ProviderError {
                code: status.as_u16().to_string(),
                description: Some(body.trim().to_string()).filter(|body| !body.is_empty()),
            });
        }
        log::trace!(target: LOG_TARGET, "provider payload keys: {:?}", payload.keys());
        Ok(payload)
    }
}

/// Accepts JSON objects, JSONP `callback( {...} );` and `a=1&b=2` bodies.
pub(crate) fn parse_provider_payload(body: &str) -> AuthResult<Map<String, Value>> {
    let trimmed = body.trim();
    let unwrapped = match (trimmed.find('('), trimmed.rfind(')')) {
        (Some(open), Some(close)) if trimmed.starts_with("callback") && open < close => {
            trimmed[open + 1..close].trim()
        }
        _ => trimmed,
    };

    if unwrapped.starts_with('{') {
        return match serde_json::from_str::<Value>(unwrapped) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => Err(AuthError::ProviderError {
                code: "malformed_response".into(),
                description: Some(truncate(unwrapped)),
            }),
        };
    }

    let map: Map<String, Value> = url::form_urlencoded::parse(unwrapped.as_bytes())
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect();
    if map.is_empty() {
        return Err(AuthError::ProviderError {
            code: "empty_response".into(),
            description: None,
        });
    }
    Ok(map)
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload
        .get(key)
        .map(value_to_string)
        .filter(|value| !value.is_empty())
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ProviderSdkClient for GraphExchangeClient {
    fn is_ready(&self) -> bool {
        !self.config.client_id.is_empty()
    }

    async fn get_user_info(&self, grant: &AuthorizationGrant) -> AuthResult<SdkUserInfo> {
        self.exchange(grant).await.map(ExchangedProfile::into_user_info)
    }

    async fn login(&self, _authorize_url: &str) -> AuthResult<bool> {
        Ok(false)
    }
}

/// [`SdkHost`] backed by the graph exchange; always "loaded", never ad-blocked.
pub struct ExchangeSdkHost {
    client: Arc<GraphExchangeClient>,
}

impl ExchangeSdkHost {
    pub fn new(client: GraphExchangeClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SdkHost for ExchangeSdkHost {
    fn sdk_present(&self, _config: &ProviderConfig) -> bool {
        true
    }

    async fn inject_script(&self, _config: &ProviderConfig) -> AuthResult<()> {
        Ok(())
    }

    fn client(&self, _config: &ProviderConfig) -> Option<SharedSdkClient> {
        let client: SharedSdkClient = self.client.clone();
        Some(client)
    }

    async fn ad_probe_collapsed(&self) -> bool {
        false
    }
}
