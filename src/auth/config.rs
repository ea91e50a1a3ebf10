use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::error::{AuthError, AuthResult};
use crate::util::retry::RetryPolicy;

const DEFAULT_AUTHORIZE_ENDPOINT: &str = "https://graph.qq.com/oauth2.0/authorize";
const DEFAULT_SDK_SCRIPT_URL: &str = "https://connect.qq.com/qc_jssdk.js";
const DEFAULT_FALLBACK_AVATAR: &str = "/images/avatar-placeholder.png";
const DEFAULT_KEY_PREFIX: &str = "idlink.auth";

/// External identity provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_endpoint: String,
    pub scope: String,
    /// Script injected to load the provider's browser SDK.
    pub sdk_script_url: String,
    /// Name of the global object the SDK installs.
    pub sdk_global: String,
    /// Primary entry method that must exist on the global before the SDK counts as ready.
    pub sdk_entry_method: String,
    /// Element id guarding against injecting the script twice.
    pub sdk_script_marker_id: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_id: "qq".to_string(),
            client_id: String::new(),
            redirect_uri: String::new(),
            authorize_endpoint: DEFAULT_AUTHORIZE_ENDPOINT.to_string(),
            scope: "get_user_info".to_string(),
            sdk_script_url: DEFAULT_SDK_SCRIPT_URL.to_string(),
            sdk_global: "QC".to_string(),
            sdk_entry_method: "Login".to_string(),
            sdk_script_marker_id: "idlink-provider-sdk".to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            ..Default::default()
        }
    }

    pub fn with_authorize_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.authorize_endpoint = endpoint.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_sdk(
        mut self,
        script_url: impl Into<String>,
        global: impl Into<String>,
        entry_method: impl Into<String>,
    ) -> Self {
        self.sdk_script_url = script_url.into();
        self.sdk_global = global.into();
        self.sdk_entry_method = entry_method.into();
        self
    }
}

/// Hosted backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the auth API, e.g. `https://project.example.co/auth/v1`.
    pub auth_url: String,
    /// Base URL of the data API, e.g. `https://project.example.co/rest/v1`.
    pub rest_url: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub profile_table: String,
    pub exists_rpc: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            rest_url: String::new(),
            api_key: String::new(),
            request_timeout_ms: 15_000,
            profile_table: "profiles".to_string(),
            exists_rpc: "account_exists_for_external_id".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn new(
        auth_url: impl Into<String>,
        rest_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            rest_url: rest_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Inputs of the deterministic credential schemes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Domain segment of synthetic emails: `{id}@{provider}.{internal_domain}.auth`.
    pub internal_domain: String,
    pub current_salt: String,
    pub legacy_salt: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            internal_domain: "directory".to_string(),
            current_salt: String::new(),
            legacy_salt: String::new(),
        }
    }
}

/// Timing and policy knobs for the redirect callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub watchdog_ms: u64,
    pub sdk_call_timeout_ms: u64,
    pub link_timeout_ms: u64,
    pub sdk_poll_attempts: u32,
    pub sdk_poll_interval_ms: u64,
    pub allow_fallback_identity: bool,
    pub fallback_avatar_url: String,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            watchdog_ms: 30_000,
            sdk_call_timeout_ms: 8_000,
            link_timeout_ms: 45_000,
            sdk_poll_attempts: 20,
            sdk_poll_interval_ms: 100,
            allow_fallback_identity: true,
            fallback_avatar_url: DEFAULT_FALLBACK_AVATAR.to_string(),
        }
    }
}

impl CallbackConfig {
    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn sdk_call_timeout(&self) -> Duration {
        Duration::from_millis(self.sdk_call_timeout_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(self.link_timeout_ms)
    }

    pub fn sdk_poll_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.sdk_poll_attempts,
            Duration::from_millis(self.sdk_poll_interval_ms),
        )
    }
}

/// Client-side persistence naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub key_prefix: String,
    /// Case-insensitive substrings identifying auth artifacts during a purge.
    pub auth_key_patterns: Vec<String>,
    pub login_attempt_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            auth_key_patterns: ["auth", "token", "session", "oauth", "csrf", "sb-"]
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
            login_attempt_ttl_secs: 10 * 60,
        }
    }
}

impl StorageConfig {
    pub fn key(&self, suffix: &str) -> String {
        format!("{}.{}", self.key_prefix, suffix)
    }

    pub fn session_key(&self) -> String {
        self.key("session")
    }
}

/// Top-level configuration for the identity-link subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentityLinkConfig {
    pub provider: ProviderConfig,
    pub backend: BackendConfig,
    pub credentials: CredentialConfig,
    pub callback: CallbackConfig,
    pub storage: StorageConfig,
}

impl IdentityLinkConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(source: &str) -> AuthResult<Self> {
        let config: Self = serde_json::from_str(source)
            .map_err(|err| AuthError::Configuration(format!("Malformed config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AuthResult<()> {
        let required = [
            ("provider.provider_id", &self.provider.provider_id),
            ("provider.client_id", &self.provider.client_id),
            ("provider.redirect_uri", &self.provider.redirect_uri),
            ("backend.auth_url", &self.backend.auth_url),
            ("backend.rest_url", &self.backend.rest_url),
            ("backend.api_key", &self.backend.api_key),
            ("credentials.internal_domain", &self.credentials.internal_domain),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(AuthError::Configuration(format!("{name} must be set")));
            }
        }
        if self.storage.auth_key_patterns.is_empty() {
            return Err(AuthError::Configuration(
                "storage.auth_key_patterns must not be empty".into(),
            ));
        }
        if self.callback.watchdog_ms == 0 {
            return Err(AuthError::Configuration(
                "callback.watchdog_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
