#![doc = include_str!("README.md")]
pub mod api;
mod client;
pub(crate) mod config;
mod credential;
pub(crate) mod error;
mod identity_link;
mod linker;
mod migration;
pub(crate) mod model;
pub mod oauth;
pub mod persistence;
mod recovery;
pub mod sdk;

#[doc(inline)]
pub use api::{AuthBackend, RestAuthBackend, SharedBackend};

#[doc(inline)]
pub use client::{AuthClient, SharedAuthClient};

#[doc(inline)]
pub use config::{
    BackendConfig, CallbackConfig, CredentialConfig, IdentityLinkConfig, ProviderConfig,
    StorageConfig,
};

#[doc(inline)]
pub use credential::{CredentialDeriver, CredentialScheme, DerivedCredentials};

#[doc(inline)]
pub use error::{AuthError, AuthErrorKind, AuthResult};

#[doc(inline)]
pub use identity_link::{IdentityLink, IdentityLinkBuilder};

#[doc(inline)]
pub use linker::IdentityLinker;

#[doc(inline)]
pub use migration::{CredentialMigrator, MigrationOutcome};

#[doc(inline)]
pub use model::{
    AccountMetadata, ExternalIdentity, IdentityTrust, LinkResult, ProfileRecord, Session,
    SessionUser,
};

#[doc(inline)]
pub use oauth::{
    AuthorizationGrant, AuthorizationRequest, CallbackController, CallbackOutcome, CallbackState,
    DiagnosticTrail, IdentityResolver, LoginInitiator, LoginStateStore, Resolution,
};

#[doc(inline)]
pub use persistence::{AuthKeyMatcher, InMemoryStorage, SharedStorage, StorageLayer};

#[cfg(not(all(feature = "wasm-web", target_arch = "wasm32")))]
#[doc(inline)]
pub use persistence::FileStorage;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
#[doc(inline)]
pub use persistence::{CookieStorage, IndexedDbStorage, WebStorage, WebStorageDriver};

#[doc(inline)]
pub use recovery::{PurgeReport, RecoveryOutcome, SessionRecoveryManager};

#[doc(inline)]
pub use sdk::{
    ExchangeConfig, ExchangeSdkHost, GraphExchangeClient, ProviderSdkClient, SdkHost, SdkLoader,
    SdkUserInfo, SharedSdkClient, SharedSdkHost,
};

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
#[doc(inline)]
pub use sdk::BrowserSdkHost;
