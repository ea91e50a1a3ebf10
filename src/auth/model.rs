use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::error::AuthError;

/// How much an [`ExternalIdentity`] can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentityTrust {
    /// Returned by the provider (SDK or server-side exchange).
    #[default]
    Verified,
    /// Synthesized locally from the redirect's code/state.
    Fallback,
}

impl IdentityTrust {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityTrust::Verified => "verified",
            IdentityTrust::Fallback => "fallback",
        }
    }
}

impl fmt::Display for IdentityTrust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity reported by (or synthesized for) the external provider during one login
/// attempt. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub provider: String,
    pub external_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub gender: Option<String>,
    pub trust: IdentityTrust,
}

impl ExternalIdentity {
    pub fn new(
        provider: impl Into<String>,
        external_id: impl Into<String>,
        display_name: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            external_id: external_id.into(),
            display_name: display_name.into(),
            avatar_url: avatar_url.into(),
            gender: None,
            trust: IdentityTrust::Verified,
        }
    }

    pub fn with_gender(mut self, gender: Option<String>) -> Self {
        self.gender = gender;
        self
    }

    pub fn with_trust(mut self, trust: IdentityTrust) -> Self {
        self.trust = trust;
        self
    }

    pub fn is_fallback(&self) -> bool {
        self.trust == IdentityTrust::Fallback
    }
}

/// Metadata stored on the backend account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMetadata {
    pub display_name: String,
    pub avatar_url: String,
    pub external_id: String,
    pub provider: String,
    pub identity_trust: IdentityTrust,
    pub credential_scheme: String,
}

/// User attached to a backend session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

/// Bearer + refresh credential pair persisted client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expiration timestamp in seconds since the Unix epoch.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: SessionUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }

    /// True when the access token expires within `tolerance` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, tolerance: ChronoDuration) -> bool {
        match self.expires_at() {
            Some(expiry) => expiry <= now + tolerance,
            None => false,
        }
    }
}

/// Profile row stored separately from the account, foreign-keyed by `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub provider: String,
    pub external_id: String,
    pub is_admin: bool,
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    pub fn for_identity(user_id: impl Into<String>, identity: &ExternalIdentity) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            provider: identity.provider.clone(),
            external_id: identity.external_id.clone(),
            is_admin: false,
            is_muted: false,
            muted_until: None,
        }
    }
}

/// Result of linking an external identity to a local account.
#[derive(Debug, Clone)]
pub struct LinkResult {
    pub is_new_account: bool,
    pub session: Session,
    /// Non-fatal problems, e.g. [`AuthError::ProfileSyncWarning`].
    pub warnings: Vec<AuthError>,
}
