//! Loading the external provider's client library.
//!
//! The provider SDK is global, mutable browser state in practice. The crate reaches it
//! only through two seams:
//!
//! * [`SdkHost`] knows how to detect, inject and probe the SDK in a given environment
//!   (a browser page, or a server-side exchange on native targets).
//! * [`ProviderSdkClient`] is the loaded SDK itself.
//!
//! [`SdkLoader`] sits on top of a host and turns SDK unavailability into a plain `false`
//! / `None` so the callback flow can branch to its fallback path without error handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::config::ProviderConfig;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{ExternalIdentity, IdentityTrust};
use crate::auth::oauth::AuthorizationGrant;
use crate::util::retry::{poll_until, RetryPolicy};

pub mod exchange;
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub mod web;

pub use exchange::{ExchangeConfig, ExchangeSdkHost, ExchangedProfile, GraphExchangeClient};
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use web::BrowserSdkHost;

const LOG_TARGET: &str = "identity_link::sdk";

/// Payload of the provider's `get_user_info` call. `ret == 0` signals success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkUserInfo {
    #[serde(default)]
    pub ret: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default, rename = "avatarUrl", alias = "figureurl_qq_2")]
    pub avatar_url: Option<String>,
    #[serde(default, rename = "figureurl_qq_1")]
    pub avatar_url_small: Option<String>,
    #[serde(default, rename = "openId", alias = "openid")]
    pub open_id: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

impl SdkUserInfo {
    /// Converts a successful payload into a verified identity.
    ///
    /// A non-zero `ret` or a missing open id is reported as [`AuthError::SdkLoadFailure`],
    /// which the resolver routes to the fallback path.
    pub fn into_identity(self, provider: &str) -> AuthResult<ExternalIdentity> {
        if self.ret != 0 {
            return Err(AuthError::SdkLoadFailure(format!(
                "get_user_info returned ret={}: {}",
                self.ret, self.msg
            )));
        }
        let open_id = self
            .open_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AuthError::SdkLoadFailure("get_user_info response carried no open id".into())
            })?;

        let nickname = self.nickname.trim();
        let display_name = if nickname.is_empty() {
            format!("{provider} user")
        } else {
            nickname.to_string()
        };
        let avatar_url = self
            .avatar_url
            .filter(|url| !url.is_empty())
            .or(self.avatar_url_small)
            .unwrap_or_default();
        let gender = self.gender.filter(|gender| !gender.is_empty());

        Ok(ExternalIdentity::new(provider, open_id, display_name, avatar_url)
            .with_gender(gender)
            .with_trust(IdentityTrust::Verified))
    }
}

/// The provider's client library once loaded.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait ProviderSdkClient: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn get_user_info(&self, grant: &AuthorizationGrant) -> AuthResult<SdkUserInfo>;

    /// Hands an authorization URL to the SDK's own login entry point.
    ///
    /// Returns `false` when the SDK has no interactive login and the caller should
    /// navigate to the URL itself.
    async fn login(&self, authorize_url: &str) -> AuthResult<bool>;
}

pub type SharedSdkClient = Arc<dyn ProviderSdkClient>;

/// Environment in which the provider SDK lives.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait SdkHost: Send + Sync {
    /// True when the SDK global and its primary entry method both exist.
    fn sdk_present(&self, config: &ProviderConfig) -> bool;

    /// Injects the SDK script at most once and resolves on `onload`, or fails on
    /// `onerror`. Calling it again after a successful injection is a no-op.
    async fn inject_script(&self, config: &ProviderConfig) -> AuthResult<()>;

    fn client(&self, config: &ProviderConfig) -> Option<SharedSdkClient>;

    /// Renders a bait element with ad-related class names and reports whether the
    /// browser collapsed it.
    async fn ad_probe_collapsed(&self) -> bool;
}

pub type SharedSdkHost = Arc<dyn SdkHost>;

/// Idempotent, retriable SDK readiness check and client factory.
///
/// Once the ad-blocker probe reports interference the loader stays blocked for its
/// lifetime, so later attempts skip the SDK path without touching the host again.
pub struct SdkLoader {
    host: SharedSdkHost,
    poll_policy: RetryPolicy,
    blocked: AtomicBool,
    probed: AtomicBool,
}

impl SdkLoader {
    pub fn new(host: SharedSdkHost, poll_policy: RetryPolicy) -> Self {
        Self {
            host,
            poll_policy,
            blocked: AtomicBool::new(false),
            probed: AtomicBool::new(false),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Runs the ad-blocker probe once per loader and caches the answer.
    pub async fn detect_ad_blocker(&self) -> bool {
        if self.probed.swap(true, Ordering::SeqCst) {
            return self.is_blocked();
        }
        let collapsed = self.host.ad_probe_collapsed().await;
        if collapsed {
            log::info!(
                target: LOG_TARGET,
                "ad blocker detected; provider SDK disabled for this session"
            );
            self.blocked.store(true, Ordering::SeqCst);
        }
        collapsed
    }

    /// Resolves `true` once the SDK global is usable. Never fails.
    pub async fn ensure_sdk_ready(&self, config: &ProviderConfig) -> bool {
        if self.host.sdk_present(config) {
            return true;
        }
        if self.is_blocked() {
            log::debug!(target: LOG_TARGET, "skipping SDK load: blocked");
            return false;
        }

        if let Err(err) = self.host.inject_script(config).await {
            self.record_failure(&format!("script {} failed: {err}", config.sdk_script_url))
                .await;
            return false;
        }

        let host = &self.host;
        if poll_until(&self.poll_policy, || host.sdk_present(config)).await {
            log::debug!(target: LOG_TARGET, "provider SDK global '{}' ready", config.sdk_global);
            return true;
        }

        self.record_failure(&format!(
            "global '{}.{}' did not appear after {} polls",
            config.sdk_global, config.sdk_entry_method, self.poll_policy.max_attempts
        ))
        .await;
        false
    }

    /// Factory form of [`SdkLoader::ensure_sdk_ready`].
    pub async fn load(&self, config: &ProviderConfig) -> Option<SharedSdkClient> {
        if !self.ensure_sdk_ready(config).await {
            return None;
        }
        self.host.client(config).filter(|client| client.is_ready())
    }

    async fn record_failure(&self, message: &str) {
        if self.detect_ad_blocker().await {
            log::debug!(target: LOG_TARGET, "expected SDK failure behind ad blocker: {message}");
        } else {
            log::warn!(target: LOG_TARGET, "provider SDK unavailable: {message}");
        }
    }
}
