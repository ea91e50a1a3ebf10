use url::Url;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::oauth::AuthorizationGrant;

const RELATIVE_BASE: &str = "http://redirect.invalid/";

/// Parameters carried by the provider's redirect back to the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl RedirectParams {
    /// Reads the parameters from an absolute URL, a relative path or a bare query string.
    ///
    /// Both the query and the fragment are inspected; the query wins when a parameter
    /// appears in both.
    pub fn parse(redirect_url: &str) -> AuthResult<Self> {
        let url = match Url::parse(redirect_url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(RELATIVE_BASE)?.join(redirect_url)?
            }
            Err(err) => return Err(err.into()),
        };

        let mut params = RedirectParams::default();
        let fragment_pairs = url
            .fragment()
            .map(|fragment| url::form_urlencoded::parse(fragment.trim_start_matches('?').as_bytes()));
        let pairs = url
            .query_pairs()
            .chain(fragment_pairs.into_iter().flatten());

        for (name, value) in pairs {
            let slot = match name.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" | "msg" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.into_owned());
            }
        }
        Ok(params)
    }

    /// Validates the redirect against the stored CSRF token.
    ///
    /// The checks run in a fixed order: provider error, missing code, state mismatch.
    /// When nothing was stored the state check is skipped.
    pub fn validate(
        &self,
        stored_state: Option<&str>,
        redirect_uri: &str,
    ) -> AuthResult<AuthorizationGrant> {
        if let Some(code) = self.error.as_ref() {
            return Err(AuthError::ProviderError {
                code: code.clone(),
                description: self.error_description.clone(),
            });
        }
        let code = self
            .code
            .as_ref()
            .ok_or(AuthError::MissingAuthorizationCode)?;
        if let Some(expected) = stored_state {
            if self.state.as_deref() != Some(expected) {
                return Err(AuthError::CsrfMismatch {
                    expected: expected.to_string(),
                    received: self.state.clone(),
                });
            }
        }
        Ok(AuthorizationGrant {
            code: code.clone(),
            state: self.state.clone().unwrap_or_default(),
            redirect_uri: redirect_uri.to_string(),
        })
    }
}
