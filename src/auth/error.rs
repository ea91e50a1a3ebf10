use std::fmt;
use std::time::Duration;

pub type AuthResult<T> = Result<T, AuthError>;

/// Coarse classification of an [`AuthError`], used by the callback state machine and by
/// callers that only need to branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    CsrfMismatch,
    MissingAuthorizationCode,
    ProviderError,
    SdkLoadFailure,
    IdentityRetrievalTimeout,
    AccountLinkConflict,
    InvalidCredentials,
    TokenInvalidOrExpired,
    NetworkUnavailable,
    ProfileSyncWarning,
    AccountLink,
    Storage,
    Cancelled,
    Configuration,
    Internal,
}

impl AuthErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthErrorKind::CsrfMismatch => "csrf-mismatch",
            AuthErrorKind::MissingAuthorizationCode => "missing-authorization-code",
            AuthErrorKind::ProviderError => "provider-error",
            AuthErrorKind::SdkLoadFailure => "sdk-load-failure",
            AuthErrorKind::IdentityRetrievalTimeout => "identity-retrieval-timeout",
            AuthErrorKind::AccountLinkConflict => "account-link-conflict",
            AuthErrorKind::InvalidCredentials => "invalid-credentials",
            AuthErrorKind::TokenInvalidOrExpired => "token-invalid-or-expired",
            AuthErrorKind::NetworkUnavailable => "network-unavailable",
            AuthErrorKind::ProfileSyncWarning => "profile-sync-warning",
            AuthErrorKind::AccountLink => "account-link",
            AuthErrorKind::Storage => "storage",
            AuthErrorKind::Cancelled => "cancelled",
            AuthErrorKind::Configuration => "configuration",
            AuthErrorKind::Internal => "internal",
        }
    }

    /// Terminal failures are shown to the user with a retry affordance and are never
    /// retried automatically.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AuthErrorKind::CsrfMismatch
                | AuthErrorKind::MissingAuthorizationCode
                | AuthErrorKind::ProviderError
                | AuthErrorKind::InvalidCredentials
                | AuthErrorKind::AccountLink
        )
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    CsrfMismatch { expected: String, received: Option<String> },
    MissingAuthorizationCode,
    ProviderError { code: String, description: Option<String> },
    SdkLoadFailure(String),
    IdentityRetrievalTimeout(Duration),
    AccountLinkConflict(String),
    InvalidCredentials(String),
    TokenInvalidOrExpired(String),
    NetworkUnavailable(String),
    ProfileSyncWarning(String),
    /// Linking an external identity failed; wraps the underlying cause.
    AccountLink(Box<AuthError>),
    Storage(String),
    Cancelled,
    Configuration(String),
    Internal(String),
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::CsrfMismatch { .. } => AuthErrorKind::CsrfMismatch,
            AuthError::MissingAuthorizationCode => AuthErrorKind::MissingAuthorizationCode,
            AuthError::ProviderError { .. } => AuthErrorKind::ProviderError,
            AuthError::SdkLoadFailure(_) => AuthErrorKind::SdkLoadFailure,
            AuthError::IdentityRetrievalTimeout(_) => AuthErrorKind::IdentityRetrievalTimeout,
            AuthError::AccountLinkConflict(_) => AuthErrorKind::AccountLinkConflict,
            AuthError::InvalidCredentials(_) => AuthErrorKind::InvalidCredentials,
            AuthError::TokenInvalidOrExpired(_) => AuthErrorKind::TokenInvalidOrExpired,
            AuthError::NetworkUnavailable(_) => AuthErrorKind::NetworkUnavailable,
            AuthError::ProfileSyncWarning(_) => AuthErrorKind::ProfileSyncWarning,
            AuthError::AccountLink(_) => AuthErrorKind::AccountLink,
            AuthError::Storage(_) => AuthErrorKind::Storage,
            AuthError::Cancelled => AuthErrorKind::Cancelled,
            AuthError::Configuration(_) => AuthErrorKind::Configuration,
            AuthError::Internal(_) => AuthErrorKind::Internal,
        }
    }

    /// Wraps `cause` as an account-link failure unless it already is one.
    pub fn account_link(cause: AuthError) -> Self {
        match cause {
            AuthError::AccountLink(_) => cause,
            other => AuthError::AccountLink(Box::new(other)),
        }
    }

    /// Returns the innermost error, looking through [`AuthError::AccountLink`].
    pub fn root_cause(&self) -> &AuthError {
        match self {
            AuthError::AccountLink(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// True when the failure means the persisted session can no longer be used.
    pub fn is_token_failure(&self) -> bool {
        matches!(self.root_cause(), AuthError::TokenInvalidOrExpired(_))
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::CsrfMismatch { expected, received } => write!(
                f,
                "OAuth state mismatch: expected '{expected}', received '{}'",
                received.as_deref().unwrap_or("<none>")
            ),
            AuthError::MissingAuthorizationCode => {
                write!(f, "Redirect did not carry an authorization code")
            }
            AuthError::ProviderError { code, description } => match description {
                Some(description) => write!(f, "Identity provider error '{code}': {description}"),
                None => write!(f, "Identity provider error '{code}'"),
            },
            AuthError::SdkLoadFailure(message) => {
                write!(f, "Provider SDK unavailable: {message}")
            }
            AuthError::IdentityRetrievalTimeout(after) => write!(
                f,
                "Provider user info not received within {} ms",
                after.as_millis()
            ),
            AuthError::AccountLinkConflict(message) => {
                write!(f, "Account already registered: {message}")
            }
            AuthError::InvalidCredentials(message) => {
                write!(f, "Invalid credentials: {message}")
            }
            AuthError::TokenInvalidOrExpired(message) => {
                write!(f, "Session token invalid or expired: {message}")
            }
            AuthError::NetworkUnavailable(message) => write!(f, "Network error: {message}"),
            AuthError::ProfileSyncWarning(message) => {
                write!(f, "Profile record not synchronized: {message}")
            }
            AuthError::AccountLink(cause) => {
                write!(f, "Failed to link external identity: {cause}")
            }
            AuthError::Storage(message) => write!(f, "Client storage error: {message}"),
            AuthError::Cancelled => write!(f, "Login flow cancelled"),
            AuthError::Configuration(message) => write!(f, "Invalid configuration: {message}"),
            AuthError::Internal(message) => write!(f, "Internal error: {message}"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::AccountLink(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        AuthError::Storage(format!("Malformed persisted payload: {error}"))
    }
}

impl From<url::ParseError> for AuthError {
    fn from(error: url::ParseError) -> Self {
        AuthError::Configuration(format!("Invalid URL: {error}"))
    }
}
