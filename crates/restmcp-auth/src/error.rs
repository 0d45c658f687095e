//! Error types for authentication and token lifecycle operations.
//!
//! Every variant maps to a stable taxonomy code via [`AuthError::error_code`],
//! which is what challenge responses and callback pages expose to callers.
//! Error text never carries verifiers, signing keys, client secrets or tokens.

use thiserror::Error;

/// Result type for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while acquiring, storing or checking credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The bearer token is malformed, expired or issued for another audience.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token is valid but lacks scopes required by the operation.
    #[error("insufficient scope: missing [{}]", missing.join(", "))]
    InsufficientScope {
        /// Scopes the token did not carry.
        missing: Vec<String>,
    },

    /// Signed state failed verification (tampering, expiry or a foreign secret).
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Caller-safe reason.
        reason: String,
        /// Extra detail, only shown outside production mode.
        diagnostic: Option<String>,
    },

    /// The authorization server returned a non-2xx status, a malformed 2xx
    /// body, or could not be reached.
    #[error("{}", upstream_message(*status, error.as_deref(), description))]
    Upstream {
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// OAuth `error` code from the response body.
        error: Option<String>,
        /// Human-readable description.
        description: String,
    },

    /// The device or authorization code window elapsed before approval.
    #[error("authorization code expired before the user completed login")]
    ExpiredCode,

    /// No usable token exists and this path cannot start an interactive login.
    #[error("no valid token for provider '{provider}'; run the login tool first")]
    LoginRequired {
        /// Provider that needs a login.
        provider: String,
    },

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// An interactive wait exceeded its allotted time.
    #[error("timed out after {0} seconds")]
    Timeout(u64),

    /// Configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Token persistence failed.
    #[error("token storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Token encryption failed.
    #[error("token encryption failed")]
    Cipher,

    /// Configuration source could not be parsed.
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

fn upstream_message(status: Option<u16>, error: Option<&str>, description: &str) -> String {
    match (status, error) {
        (Some(status), Some(error)) => {
            format!("authorization server returned {status} ({error}): {description}")
        }
        (Some(status), None) => format!("authorization server returned {status}: {description}"),
        (None, Some(error)) => format!("authorization server error ({error}): {description}"),
        (None, None) => format!("authorization server request failed: {description}"),
    }
}

impl AuthError {
    /// Stable taxonomy code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid_token",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::InvalidState { .. } => "invalid_state",
            Self::Upstream { .. } => "upstream_error",
            Self::ExpiredCode => "expired_code",
            Self::LoginRequired { .. } => "login_required",
            Self::Cancelled => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) | Self::Config(_) => "configuration_error",
            Self::Storage(_) | Self::Cipher => "storage_error",
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn invalid_state(reason: impl Into<String>, diagnostic: Option<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
            diagnostic,
        }
    }

    /// Upstream failure without an OAuth error code
    pub(crate) fn upstream(status: u16, description: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            error: None,
            description: description.into(),
        }
    }

    /// Equivalent error for a second recipient; sources are flattened to text.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::InvalidToken(m) => Self::InvalidToken(m.clone()),
            Self::InsufficientScope { missing } => Self::InsufficientScope {
                missing: missing.clone(),
            },
            Self::InvalidState { reason, diagnostic } => Self::InvalidState {
                reason: reason.clone(),
                diagnostic: diagnostic.clone(),
            },
            Self::Upstream {
                status,
                error,
                description,
            } => Self::Upstream {
                status: *status,
                error: error.clone(),
                description: description.clone(),
            },
            Self::ExpiredCode => Self::ExpiredCode,
            Self::LoginRequired { provider } => Self::LoginRequired {
                provider: provider.clone(),
            },
            Self::Cancelled => Self::Cancelled,
            Self::Timeout(secs) => Self::Timeout(*secs),
            Self::Configuration(m) => Self::Configuration(m.clone()),
            Self::Storage(e) => Self::Storage(std::io::Error::new(e.kind(), e.to_string())),
            Self::Cipher => Self::Cipher,
            Self::Config(e) => Self::Configuration(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest errors embed the request URL but never the form body
        Self::Upstream {
            status: err.status().map(|s| s.as_u16()),
            error: None,
            description: err.without_url().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AuthError::ExpiredCode.error_code(), "expired_code");
        assert_eq!(
            AuthError::InsufficientScope {
                missing: vec!["api.write".into()]
            }
            .error_code(),
            "insufficient_scope"
        );
        assert_eq!(AuthError::upstream(500, "boom").error_code(), "upstream_error");
        assert_eq!(AuthError::Cipher.error_code(), "storage_error");
    }

    #[test]
    fn test_upstream_display() {
        let err = AuthError::Upstream {
            status: Some(400),
            error: Some("invalid_grant".into()),
            description: "refresh token revoked".into(),
        };
        assert_eq!(
            err.to_string(),
            "authorization server returned 400 (invalid_grant): refresh token revoked"
        );
    }

    #[test]
    fn test_login_required_mentions_login_tool() {
        let err = AuthError::LoginRequired {
            provider: "github".into(),
        };
        assert!(err.to_string().contains("login tool"));
    }

    #[test]
    fn test_invalid_state_hides_diagnostic_in_display() {
        let err = AuthError::invalid_state("signature mismatch", Some("raw={...}".into()));
        assert!(!err.to_string().contains("raw="));
    }
}
