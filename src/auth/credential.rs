//! Deterministic derivation of the backend login for an external identity.
//!
//! Accounts linked to an external identity have no user-chosen password. Their email is
//! synthesized from `(provider, external_id)` and the password is derived from the same
//! data with a scheme that changed between application versions:
//!
//! * **current** - lowercase hex of `SHA-256("v2:{provider}:{external_id}:{current_salt}")`
//! * **legacy**  - lowercase hex of `SHA-1("{external_id}{legacy_salt}")`

use std::fmt::Write as _;

use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::auth::config::CredentialConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialScheme {
    Current,
    Legacy,
}

impl CredentialScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialScheme::Current => "v2-sha256",
            CredentialScheme::Legacy => "v1-sha1",
        }
    }
}

/// Email plus both candidate passwords for one external identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedCredentials {
    pub email: String,
    pub current_password: String,
    pub legacy_password: String,
}

#[derive(Debug, Clone)]
pub struct CredentialDeriver {
    config: CredentialConfig,
}

impl CredentialDeriver {
    pub fn new(config: CredentialConfig) -> Self {
        Self { config }
    }

    /// `{external_id}@{provider}.{internal_domain}.auth`.
    ///
    /// The local part keeps `[a-z0-9.-]` verbatim and escapes everything else with `_`:
    /// an uppercase letter becomes `_` plus its lowercase form, `_` becomes `__`, and any
    /// other byte becomes `_` plus its three-digit decimal value. Distinct ids therefore
    /// never share an email, even on backends that fold email case.
    pub fn synthetic_email(&self, provider: &str, external_id: &str) -> String {
        format!(
            "{}@{}.{}.auth",
            escape_local_part(external_id),
            sanitize_domain_label(provider),
            sanitize_domain_label(&self.config.internal_domain)
        )
    }

    pub fn password(&self, scheme: CredentialScheme, provider: &str, external_id: &str) -> String {
        match scheme {
            CredentialScheme::Current => {
                let input = format!(
                    "v2:{provider}:{external_id}:{}",
                    self.config.current_salt
                );
                to_hex(&Sha256::digest(input.as_bytes()))
            }
            CredentialScheme::Legacy => {
                let input = format!("{external_id}{}", self.config.legacy_salt);
                to_hex(&Sha1::digest(input.as_bytes()))
            }
        }
    }

    pub fn derive(&self, provider: &str, external_id: &str) -> DerivedCredentials {
        DerivedCredentials {
            email: self.synthetic_email(provider, external_id),
            current_password: self.password(CredentialScheme::Current, provider, external_id),
            legacy_password: self.password(CredentialScheme::Legacy, provider, external_id),
        }
    }
}

fn escape_local_part(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' => out.push(byte as char),
            b'A'..=b'Z' => {
                out.push('_');
                out.push(byte.to_ascii_lowercase() as char);
            }
            b'_' => out.push_str("__"),
            other => {
                let _ = write!(out, "_{other:03}");
            }
        }
    }
    out
}

fn sanitize_domain_label(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9' | '-' | '.') => c,
            _ => '-',
        })
        .collect()
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
