//! Token data model
//!
//! [`TokenData`] is the unit a strategy persists after a successful exchange.
//! Values are replaced wholesale on refresh or login, never edited in place.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens expiring within this window are treated as already expired.
pub const EXPIRY_SAFETY_WINDOW: Duration = Duration::seconds(60);

/// Tokens obtained from an authorization server.
///
/// `expires_at` is computed from `expires_in` when the response is received.
/// A token without `expires_at` never expires from this crate's point of view.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    /// Access token sent as the bearer credential
    pub access_token: String,

    /// Refresh token, if the server issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute expiry in UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// OpenID Connect ID token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

// Manual Debug impl to prevent token exposure in logs
impl std::fmt::Debug for TokenData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenData")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl TokenData {
    /// Create token data holding only an access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            id_token: None,
        }
    }

    /// Set the refresh token
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set an expiry relative to now
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        // a lifetime past chrono's range is stored without an expiry
        self.expires_at = i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
        self
    }

    /// Set an absolute expiry
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the ID token
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    /// Whether the token expires within `window` of `now`
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + window,
            None => false,
        }
    }

    /// Whether the token can be used without refreshing
    pub fn is_usable(&self) -> bool {
        !self.expires_within(EXPIRY_SAFETY_WINDOW, Utc::now())
    }
}
