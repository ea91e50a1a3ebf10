use std::sync::Arc;
use std::time::Duration;

use crate::auth::config::{CallbackConfig, ProviderConfig};
use crate::auth::error::AuthError;
use crate::auth::model::ExternalIdentity;
use crate::auth::oauth::fallback::FallbackIdentityFactory;
use crate::auth::oauth::AuthorizationGrant;
use crate::auth::sdk::SdkLoader;
use crate::platform::runtime;

const LOG_TARGET: &str = "identity_link::resolver";

/// Outcome of one resolution step.
#[derive(Debug)]
pub enum Resolution {
    Resolved(ExternalIdentity),
    /// The SDK path failed in a recoverable way; the error says why.
    Fallback(AuthError),
    Fail(AuthError),
}

/// Turns an authorization grant into an [`ExternalIdentity`].
pub struct IdentityResolver {
    loader: Arc<SdkLoader>,
    provider: ProviderConfig,
    sdk_call_timeout: Duration,
    allow_fallback: bool,
    fallback: FallbackIdentityFactory,
}

impl IdentityResolver {
    pub fn new(loader: Arc<SdkLoader>, provider: ProviderConfig, callback: &CallbackConfig) -> Self {
        let fallback =
            FallbackIdentityFactory::new(&provider.provider_id, &callback.fallback_avatar_url);
        Self {
            loader,
            provider,
            sdk_call_timeout: callback.sdk_call_timeout(),
            allow_fallback: callback.allow_fallback_identity,
            fallback,
        }
    }

    pub fn loader(&self) -> &Arc<SdkLoader> {
        &self.loader
    }

    pub fn allows_fallback(&self) -> bool {
        self.allow_fallback
    }

    /// Asks the provider SDK for the user's identity.
    ///
    /// Every SDK problem (blocked, not loaded, error payload, timeout) becomes
    /// [`Resolution::Fallback`], or [`Resolution::Fail`] when fallback identities are
    /// disabled.
    pub async fn resolve_via_sdk(&self, grant: &AuthorizationGrant) -> Resolution {
        match self.sdk_identity(grant).await {
            Ok(identity) => Resolution::Resolved(identity),
            Err(err) => {
                log::info!(target: LOG_TARGET, "SDK identity path abandoned: {err}");
                self.degrade(err)
            }
        }
    }

    /// Maps a recoverable SDK failure to the configured degradation.
    pub fn degrade(&self, err: AuthError) -> Resolution {
        if self.allow_fallback {
            Resolution::Fallback(err)
        } else {
            Resolution::Fail(err)
        }
    }

    pub fn fallback_identity(&self, grant: &AuthorizationGrant) -> ExternalIdentity {
        self.fallback.synthesize(grant)
    }

    async fn sdk_identity(&self, grant: &AuthorizationGrant) -> Result<ExternalIdentity, AuthError> {
        if self.loader.is_blocked() {
            return Err(AuthError::SdkLoadFailure("blocked by content filter".into()));
        }
        let client = self.loader.load(&self.provider).await.ok_or_else(|| {
            let reason = if self.loader.is_blocked() {
                "blocked by content filter"
            } else {
                "SDK did not become ready"
            };
            AuthError::SdkLoadFailure(reason.into())
        })?;

        let info = runtime::timeout(self.sdk_call_timeout, client.get_user_info(grant))
            .await
            .map_err(|elapsed| AuthError::IdentityRetrievalTimeout(elapsed.0))??;
        info.into_identity(&self.provider.provider_id)
    }
}
