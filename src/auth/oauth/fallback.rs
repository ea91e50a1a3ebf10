//! Locally synthesized stand-in identity.
//!
//! Used when the provider SDK cannot be reached or answers too slowly. The identity is a
//! pure function of the redirect's authorization code and state:
//!
//! ```text
//! hash        = lowercase_hex(SHA-256(code || state))
//! external_id = "{provider}_fb_{hash[..32]}"
//! display     = "{Provider} user {HASH[..6]}"
//! ```
//!
//! Replaying the same redirect therefore resolves to the same external id for as long
//! as the authorization code is valid. Identities minted here carry
//! [`IdentityTrust::Fallback`] so accounts created from them can be told apart from
//! provider-verified ones.

use sha2::{Digest, Sha256};

use crate::auth::credential::to_hex;
use crate::auth::model::{ExternalIdentity, IdentityTrust};
use crate::auth::oauth::AuthorizationGrant;

const EXTERNAL_ID_HASH_LEN: usize = 32;
const DISPLAY_HASH_LEN: usize = 6;

pub fn fallback_hash(code: &str, state: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.update(state.as_bytes());
    to_hex(&hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct FallbackIdentityFactory {
    provider: String,
    avatar_url: String,
}

impl FallbackIdentityFactory {
    pub fn new(provider: impl Into<String>, avatar_url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            avatar_url: avatar_url.into(),
        }
    }

    pub fn synthesize(&self, grant: &AuthorizationGrant) -> ExternalIdentity {
        let hash = fallback_hash(&grant.code, &grant.state);
        let external_id = format!("{}_fb_{}", self.provider, &hash[..EXTERNAL_ID_HASH_LEN]);
        let display_name = format!(
            "{} user {}",
            capitalize(&self.provider),
            hash[..DISPLAY_HASH_LEN].to_ascii_uppercase()
        );
        ExternalIdentity::new(&self.provider, external_id, display_name, &self.avatar_url)
            .with_trust(IdentityTrust::Fallback)
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
