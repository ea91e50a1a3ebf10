//! OAuth redirect flow against the external identity provider.
//!
//! [`LoginInitiator`] starts a login: it persists the CSRF state, the originating path and
//! a login-attempt marker, then builds the provider's authorization URL. When the browser
//! comes back, [`CallbackController`] validates the redirect, resolves the external
//! identity and links it to a local account.

mod callback;
mod fallback;
mod redirect;
mod resolver;
mod state;

pub use callback::{
    CallbackController, CallbackOutcome, CallbackState, DiagnosticTrail, TrailEntry,
};
pub use fallback::{fallback_hash, FallbackIdentityFactory};
pub use redirect::RedirectParams;
pub use resolver::{IdentityResolver, Resolution};
pub use state::{CsrfState, LoginAttemptMarker, LoginStateStore};

use base64::Engine;
use rand::RngCore;
use url::Url;

use crate::auth::config::ProviderConfig;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::sdk::SdkLoader;

const STATE_BYTES: usize = 32;
const LOG_TARGET: &str = "identity_link::oauth";

/// Authorization code and state returned by the provider, plus the redirect URI the code
/// was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub code: String,
    pub state: String,
    pub redirect_uri: String,
}

/// A login ready to be handed to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Fully qualified provider URL to navigate to.
    pub url: String,
    /// CSRF token embedded in `url` and persisted client-side.
    pub state: String,
    /// True when the provider SDK took over the navigation.
    pub handled_by_sdk: bool,
}

/// Generates a URL-safe random CSRF token.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds `authorize_endpoint?response_type=code&client_id=..&redirect_uri=..&state=..&scope=..`.
pub fn build_authorize_url(provider: &ProviderConfig, state: &str) -> AuthResult<String> {
    if provider.client_id.is_empty() || provider.redirect_uri.is_empty() {
        return Err(AuthError::Configuration(
            "client_id and redirect_uri are required to start a login".into(),
        ));
    }
    let mut url = Url::parse(&provider.authorize_endpoint)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &provider.client_id)
            .append_pair("redirect_uri", &provider.redirect_uri)
            .append_pair("state", state);
        if !provider.scope.is_empty() {
            query.append_pair("scope", &provider.scope);
        }
    }
    Ok(url.into())
}

/// Starts the outbound half of the flow.
pub struct LoginInitiator {
    provider: ProviderConfig,
    state: LoginStateStore,
}

impl LoginInitiator {
    pub fn new(provider: ProviderConfig, state: LoginStateStore) -> Self {
        Self { provider, state }
    }

    /// Persists the CSRF state, origin path and login marker, then returns the URL.
    ///
    /// Nothing is returned until the state is stored, so the redirect can never outrun
    /// the value it will be validated against.
    pub async fn begin(&self, origin_path: Option<&str>) -> AuthResult<AuthorizationRequest> {
        let state = generate_state();
        let url = build_authorize_url(&self.provider, &state)?;

        self.state.save_csrf_state(&state, origin_path).await?;
        self.state
            .mark_login_attempt(&self.provider.provider_id)
            .await?;

        log::debug!(
            target: LOG_TARGET,
            "starting {} login from {}",
            self.provider.provider_id,
            origin_path.unwrap_or("/")
        );
        Ok(AuthorizationRequest {
            url,
            state,
            handled_by_sdk: false,
        })
    }

    /// Like [`LoginInitiator::begin`], but lets a loaded provider SDK drive the login.
    pub async fn begin_with_sdk(
        &self,
        origin_path: Option<&str>,
        loader: &SdkLoader,
    ) -> AuthResult<AuthorizationRequest> {
        let mut request = self.begin(origin_path).await?;
        if let Some(client) = loader.load(&self.provider).await {
            match client.login(&request.url).await {
                Ok(handled) => request.handled_by_sdk = handled,
                Err(err) => {
                    log::warn!(target: LOG_TARGET, "SDK login failed, using redirect: {err}")
                }
            }
        }
        Ok(request)
    }
}
