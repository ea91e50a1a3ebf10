use std::sync::Arc;

use crate::auth::api::{RestAuthBackend, SharedBackend};
use crate::auth::client::{AuthClient, SharedAuthClient};
use crate::auth::config::{IdentityLinkConfig, StorageConfig};
use crate::auth::credential::CredentialDeriver;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::linker::IdentityLinker;
use crate::auth::migration::{CredentialMigrator, MigrationOutcome};
use crate::auth::model::Session;
use crate::auth::oauth::{
    AuthorizationRequest, CallbackController, CallbackOutcome, IdentityResolver, LoginInitiator,
    LoginStateStore,
};
use crate::auth::persistence::SharedStorage;
use crate::auth::recovery::{PurgeReport, RecoveryOutcome, SessionRecoveryManager};
use crate::auth::sdk::{SdkLoader, SharedSdkHost};

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
use crate::auth::persistence::{CookieStorage, IndexedDbStorage, WebStorage, WebStorageDriver};
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
use crate::auth::sdk::BrowserSdkHost;

const LOG_TARGET: &str = "identity_link";

/// Entry point wiring the login, callback and recovery components around one backend.
pub struct IdentityLink {
    config: IdentityLinkConfig,
    client: SharedAuthClient,
    loader: Arc<SdkLoader>,
    initiator: LoginInitiator,
    controller: CallbackController,
    recovery: Arc<SessionRecoveryManager>,
    migrator: CredentialMigrator,
}

impl IdentityLink {
    /// Returns a builder for configuring an `IdentityLink` instance.
    pub fn builder(config: IdentityLinkConfig) -> IdentityLinkBuilder {
        IdentityLinkBuilder::new(config)
    }

    pub fn config(&self) -> &IdentityLinkConfig {
        &self.config
    }

    pub fn client(&self) -> &SharedAuthClient {
        &self.client
    }

    pub fn sdk_loader(&self) -> &Arc<SdkLoader> {
        &self.loader
    }

    pub fn recovery(&self) -> &Arc<SessionRecoveryManager> {
        &self.recovery
    }

    pub fn current_session(&self) -> Option<Session> {
        self.client.current_session()
    }

    /// Persists the login state and returns where to send the browser.
    pub async fn begin_login(&self, origin_path: Option<&str>) -> AuthResult<AuthorizationRequest> {
        self.initiator
            .begin_with_sdk(origin_path, &self.loader)
            .await
    }

    pub async fn handle_redirect(&self, redirect_url: &str) -> CallbackOutcome {
        self.controller.handle_redirect(redirect_url).await
    }

    pub fn cancel_callback(&self) {
        self.controller.cancel();
    }

    /// Bootstrap-time session recovery.
    pub async fn recover_session(&self) -> RecoveryOutcome {
        self.recovery.recover_session().await
    }

    pub async fn purge_all_auth_artifacts(&self) -> PurgeReport {
        self.recovery.purge_all_auth_artifacts().await
    }

    /// Runs the recovery purge when `error` signals a dead session.
    pub async fn handle_error(&self, error: &AuthError) -> Option<PurgeReport> {
        self.recovery.handle_error(error).await
    }

    pub async fn sign_in_with_migration(
        &self,
        email: &str,
        current_password: &str,
        legacy_password: &str,
    ) -> AuthResult<MigrationOutcome> {
        self.migrator
            .sign_in_with_migration(email, current_password, legacy_password)
            .await
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.client.sign_out().await
    }
}

/// Builder for [`IdentityLink`].
///
/// Without overrides the backend is a [`RestAuthBackend`] built from the config. The
/// primary storage layer and SDK host default to the browser implementations under the
/// `wasm-web` feature; elsewhere storage is in-memory and a host must be supplied.
pub struct IdentityLinkBuilder {
    config: IdentityLinkConfig,
    backend: Option<SharedBackend>,
    storage: Option<SharedStorage>,
    extra_layers: Vec<SharedStorage>,
    sdk_host: Option<SharedSdkHost>,
}

impl IdentityLinkBuilder {
    fn new(config: IdentityLinkConfig) -> Self {
        Self {
            config,
            backend: None,
            storage: None,
            extra_layers: Vec::new(),
            sdk_host: None,
        }
    }

    pub fn with_backend(mut self, backend: SharedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Primary layer holding the session and the login-flow state.
    pub fn with_storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Additional layer swept by the recovery purge.
    pub fn with_storage_layer(mut self, layer: SharedStorage) -> Self {
        self.extra_layers.push(layer);
        self
    }

    pub fn with_sdk_host(mut self, host: SharedSdkHost) -> Self {
        self.sdk_host = Some(host);
        self
    }

    pub fn build(self) -> AuthResult<IdentityLink> {
        self.config.validate()?;
        let config = self.config;

        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(RestAuthBackend::new(config.backend.clone())),
        };
        let storage = self.storage.unwrap_or_else(default_storage);
        let sdk_host = match self.sdk_host {
            Some(host) => host,
            None => default_sdk_host()?,
        };

        let client: SharedAuthClient =
            Arc::new(AuthClient::new(backend, storage.clone(), &config.storage));
        let login_state = LoginStateStore::new(storage, &config.storage);

        let mut recovery =
            SessionRecoveryManager::new(client.clone(), login_state.clone(), &config.storage);
        for layer in default_extra_layers(&config.storage).into_iter().chain(self.extra_layers) {
            recovery = recovery.with_layer(layer);
        }
        let recovery = Arc::new(recovery);

        let loader = Arc::new(SdkLoader::new(sdk_host, config.callback.sdk_poll_policy()));
        let resolver = IdentityResolver::new(loader.clone(), config.provider.clone(), &config.callback);
        let linker = Arc::new(IdentityLinker::new(
            client.clone(),
            CredentialDeriver::new(config.credentials.clone()),
        ));
        let controller = CallbackController::new(
            config.provider.clone(),
            config.callback.clone(),
            login_state.clone(),
            resolver,
            linker,
        )
        .with_recovery(recovery.clone());
        let initiator = LoginInitiator::new(config.provider.clone(), login_state);
        let migrator = CredentialMigrator::new(client.clone());

        log::debug!(
            target: LOG_TARGET,
            "identity link ready for provider {}",
            config.provider.provider_id
        );

        Ok(IdentityLink {
            config,
            client,
            loader,
            initiator,
            controller,
            recovery,
            migrator,
        })
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
fn default_storage() -> SharedStorage {
    Arc::new(WebStorage::new(WebStorageDriver::Local))
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
fn default_storage() -> SharedStorage {
    crate::auth::persistence::InMemoryStorage::shared("memory")
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
fn default_extra_layers(storage: &StorageConfig) -> Vec<SharedStorage> {
    vec![
        Arc::new(WebStorage::new(WebStorageDriver::Session)),
        Arc::new(CookieStorage::new()),
        Arc::new(IndexedDbStorage::new(vec![storage.key_prefix.clone()])),
    ]
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
fn default_extra_layers(_storage: &StorageConfig) -> Vec<SharedStorage> {
    Vec::new()
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
fn default_sdk_host() -> AuthResult<SharedSdkHost> {
    Ok(Arc::new(BrowserSdkHost::new()))
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
fn default_sdk_host() -> AuthResult<SharedSdkHost> {
    Err(AuthError::Configuration(
        "an SDK host is required outside the browser; see ExchangeSdkHost".into(),
    ))
}
