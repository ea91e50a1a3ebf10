use crate::auth::client::SharedAuthClient;
use crate::auth::credential::{CredentialDeriver, CredentialScheme, DerivedCredentials};
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::migration::CredentialMigrator;
use crate::auth::model::{AccountMetadata, ExternalIdentity, LinkResult, ProfileRecord, Session};

const LOG_TARGET: &str = "identity_link::linker";

/// Maps an [`ExternalIdentity`] to exactly one backend account.
pub struct IdentityLinker {
    client: SharedAuthClient,
    deriver: CredentialDeriver,
    migrator: CredentialMigrator,
}

impl IdentityLinker {
    pub fn new(client: SharedAuthClient, deriver: CredentialDeriver) -> Self {
        let migrator = CredentialMigrator::new(client.clone());
        Self {
            client,
            deriver,
            migrator,
        }
    }

    pub fn client(&self) -> &SharedAuthClient {
        &self.client
    }

    /// Signs the identity in, registering a new account first when none exists.
    ///
    /// Failures come back as [`AuthError::AccountLink`] around the underlying cause.
    /// A profile row that cannot be written is reported in [`LinkResult::warnings`].
    pub async fn link_external_identity(&self, identity: &ExternalIdentity) -> AuthResult<LinkResult> {
        self.link(identity).await.map_err(|err| {
            log::warn!(
                target: LOG_TARGET,
                "linking {}:{} failed: {err}",
                identity.provider,
                identity.external_id
            );
            AuthError::account_link(err)
        })
    }

    async fn link(&self, identity: &ExternalIdentity) -> AuthResult<LinkResult> {
        let credentials = self.deriver.derive(&identity.provider, &identity.external_id);
        let exists = self
            .client
            .backend()
            .account_exists_for_external_id(&identity.provider, &identity.external_id)
            .await?;

        if exists {
            log::debug!(target: LOG_TARGET, "account exists for {}", credentials.email);
            let session = self.sign_in_existing(&credentials).await?;
            return Ok(LinkResult {
                is_new_account: false,
                session,
                warnings: Vec::new(),
            });
        }

        let metadata = AccountMetadata {
            display_name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            external_id: identity.external_id.clone(),
            provider: identity.provider.clone(),
            identity_trust: identity.trust,
            credential_scheme: CredentialScheme::Current.as_str().to_string(),
        };

        let session = match self
            .client
            .sign_up(&credentials.email, &credentials.current_password, &metadata)
            .await
        {
            Ok(session) => session,
            Err(AuthError::AccountLinkConflict(message)) => {
                log::info!(
                    target: LOG_TARGET,
                    "concurrent registration for {} ({message}); signing in instead",
                    credentials.email
                );
                let session = self.sign_in_existing(&credentials).await?;
                return Ok(LinkResult {
                    is_new_account: false,
                    session,
                    warnings: Vec::new(),
                });
            }
            Err(err) => return Err(err),
        };

        let mut warnings = Vec::new();
        let profile = ProfileRecord::for_identity(session.user_id(), identity);
        if let Err(err) = self.client.backend().insert_profile(&session, &profile).await {
            log::warn!(
                target: LOG_TARGET,
                "profile row for {} not created: {err}",
                session.user_id()
            );
            warnings.push(AuthError::ProfileSyncWarning(err.to_string()));
        }

        Ok(LinkResult {
            is_new_account: true,
            session,
            warnings,
        })
    }

    async fn sign_in_existing(&self, credentials: &DerivedCredentials) -> AuthResult<Session> {
        self.migrator
            .sign_in_with_migration(
                &credentials.email,
                &credentials.current_password,
                &credentials.legacy_password,
            )
            .await
            .map(|outcome| outcome.session)
    }
}
