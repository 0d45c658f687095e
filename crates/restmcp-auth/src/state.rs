//! Signed OAuth state
//!
//! The `state` parameter carried through the authorization redirect is a
//! self-contained, HMAC-signed blob:
//!
//! ```text
//! base64url(json(SignedState)) "." base64url(hmac_sha256(secret, json))
//! ```
//!
//! The signature is checked in constant time before any field is read, so a
//! callback can trust the session key, redirect URI and provider it recovers.
//! State older than the configured max age is rejected, which bounds replay.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use oauth2::CsrfToken;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AuthError, Result};
use crate::jwt::BASE64URL_LENIENT;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted signing secret length in bytes
pub const MIN_STATE_SECRET_LEN: usize = 32;

/// Default maximum age of a state value
pub const DEFAULT_STATE_MAX_AGE: Duration = Duration::from_secs(600);

// Tolerated clock difference for state issued by another replica
const FUTURE_SKEW_SECS: i64 = 60;

/// Payload carried through the authorization redirect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedState {
    /// Random per-login value, also keys the PKCE verifier
    pub nonce: String,
    /// Session that started the login
    pub session_key: String,
    /// Redirect URI used for the authorization request
    pub redirect_uri: String,
    /// Provider the login is for
    pub provider_name: String,
    /// Unix seconds at creation
    pub issued_at: i64,
}

impl SignedState {
    /// New state with a random nonce issued now
    pub fn new(
        session_key: impl Into<String>,
        redirect_uri: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            nonce: CsrfToken::new_random().secret().clone(),
            session_key: session_key.into(),
            redirect_uri: redirect_uri.into(),
            provider_name: provider_name.into(),
            issued_at: Utc::now().timestamp(),
        }
    }
}

/// Signs and verifies [`SignedState`] values
#[derive(Clone)]
pub struct SignedStateCodec {
    secret: SecretString,
    max_age: Duration,
}

impl std::fmt::Debug for SignedStateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedStateCodec")
            .field("secret", &"[REDACTED]")
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl SignedStateCodec {
    /// Create a codec.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the secret is shorter than
    /// [`MIN_STATE_SECRET_LEN`] bytes.
    pub fn new(secret: SecretString) -> Result<Self> {
        if secret.expose_secret().len() < MIN_STATE_SECRET_LEN {
            return Err(AuthError::configuration(format!(
                "state secret must be at least {} bytes",
                MIN_STATE_SECRET_LEN
            )));
        }
        Ok(Self {
            secret,
            max_age: DEFAULT_STATE_MAX_AGE,
        })
    }

    /// Override the maximum accepted age
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| AuthError::configuration("state secret rejected by HMAC"))
    }

    /// Serialise and sign a state value
    ///
    /// # Errors
    ///
    /// Fails only if the state cannot be serialised.
    pub fn encode(&self, state: &SignedState) -> Result<String> {
        let json = serde_json::to_vec(state)
            .map_err(|e| AuthError::configuration(format!("unserialisable state: {}", e)))?;
        let mut mac = self.mac()?;
        mac.update(&json);
        let signature = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&json),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Verify and decode a state value
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidState`] when the value is malformed, the
    /// signature does not match, or the state is older than the max age.
    pub fn decode(&self, raw: &str) -> Result<SignedState> {
        let Some((payload_b64, signature_b64)) = raw.split_once('.') else {
            return Err(AuthError::invalid_state("state is not signed", None));
        };

        let payload = BASE64URL_LENIENT.decode(payload_b64).map_err(|e| {
            AuthError::invalid_state("state payload is not base64url", Some(e.to_string()))
        })?;
        let signature = BASE64URL_LENIENT.decode(signature_b64).map_err(|e| {
            AuthError::invalid_state("state signature is not base64url", Some(e.to_string()))
        })?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        let expected = mac.finalize().into_bytes();
        if !bool::from(expected.as_slice().ct_eq(&signature)) {
            return Err(AuthError::invalid_state("state signature mismatch", None));
        }

        let state: SignedState = serde_json::from_slice(&payload).map_err(|e| {
            AuthError::invalid_state("state payload is malformed", Some(e.to_string()))
        })?;

        let now = Utc::now().timestamp();
        let age = now.saturating_sub(state.issued_at);
        if age < -FUTURE_SKEW_SECS {
            return Err(AuthError::invalid_state(
                "state issued in the future",
                Some(format!("issued_at={} now={}", state.issued_at, now)),
            ));
        }
        if age > i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX) {
            return Err(AuthError::invalid_state(
                "state expired",
                Some(format!("age={}s max={}s", age, self.max_age.as_secs())),
            ));
        }

        Ok(state)
    }
}
