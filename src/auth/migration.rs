use std::time::Duration;

use crate::auth::client::SharedAuthClient;
use crate::auth::credential::CredentialScheme;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::Session;
use crate::platform::runtime::spawn_detached;
use crate::util::retry::{retry_async, RetryPolicy};

const LOG_TARGET: &str = "identity_link::migration";
const REWRITE_ATTEMPTS: u32 = 3;
const REWRITE_INTERVAL: Duration = Duration::from_millis(500);
const REWRITE_BACKOFF_FACTOR: f64 = 2.0;

/// Result of a successful [`CredentialMigrator::sign_in_with_migration`].
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub session: Session,
    /// Scheme whose password was accepted.
    pub scheme: CredentialScheme,
    /// True when a background rewrite to the current scheme was started.
    pub rewrite_scheduled: bool,
}

/// Signs in with the current credential scheme and falls back to the legacy one.
///
/// A legacy sign-in schedules a background password rewrite so the account converges to
/// the current scheme. The rewrite is best effort: network failures are retried with
/// exponential backoff, and a final failure is only logged.
#[derive(Clone)]
pub struct CredentialMigrator {
    client: SharedAuthClient,
    rewrite_policy: RetryPolicy,
}

impl CredentialMigrator {
    pub fn new(client: SharedAuthClient) -> Self {
        Self {
            client,
            rewrite_policy: RetryPolicy::exponential(
                REWRITE_ATTEMPTS,
                REWRITE_INTERVAL,
                REWRITE_BACKOFF_FACTOR,
            ),
        }
    }

    /// Overrides the retry policy of the background password rewrite.
    pub fn with_rewrite_policy(mut self, policy: RetryPolicy) -> Self {
        self.rewrite_policy = policy;
        self
    }

    pub async fn sign_in_with_migration(
        &self,
        email: &str,
        current_password: &str,
        legacy_password: &str,
    ) -> AuthResult<MigrationOutcome> {
        let first_error = match self.client.sign_in_with_password(email, current_password).await {
            Ok(session) => {
                return Ok(MigrationOutcome {
                    session,
                    scheme: CredentialScheme::Current,
                    rewrite_scheduled: false,
                })
            }
            Err(err @ AuthError::InvalidCredentials(_)) => err,
            Err(err) => return Err(err),
        };

        log::debug!(
            target: LOG_TARGET,
            "current credential rejected for {email}; trying legacy scheme"
        );
        match self.client.sign_in_with_password(email, legacy_password).await {
            Ok(session) => {
                self.schedule_rewrite(&session, current_password);
                Ok(MigrationOutcome {
                    session,
                    scheme: CredentialScheme::Legacy,
                    rewrite_scheduled: true,
                })
            }
            Err(legacy_error) => {
                log::debug!(
                    target: LOG_TARGET,
                    "legacy credential rejected for {email}: {legacy_error}"
                );
                Err(first_error)
            }
        }
    }

    fn schedule_rewrite(&self, session: &Session, current_password: &str) {
        let backend = self.client.backend().clone();
        let session = session.clone();
        let password = current_password.to_string();
        let policy = self.rewrite_policy;
        spawn_detached(async move {
            let rewrite = retry_async(
                &policy,
                |attempt| {
                    if attempt > 0 {
                        log::debug!(
                            target: LOG_TARGET,
                            "retrying credential rewrite for {} (attempt {})",
                            session.user_id(),
                            attempt + 1
                        );
                    }
                    backend.update_password(&session, &password)
                },
                |err| matches!(err, AuthError::NetworkUnavailable(_)),
            );
            match rewrite.await {
                Ok(()) => log::info!(
                    target: LOG_TARGET,
                    "credential for {} migrated to {}",
                    session.user_id(),
                    CredentialScheme::Current.as_str()
                ),
                Err(err) => log::warn!(
                    target: LOG_TARGET,
                    "credential migration for {} failed: {err}",
                    session.user_id()
                ),
            }
        });
    }
}
