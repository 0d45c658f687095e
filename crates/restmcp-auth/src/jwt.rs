//! JWT claim extraction
//!
//! Bearer tokens reaching this crate are assumed to have been verified by an
//! upstream gateway. [`JwtClaimExtractor`] only decodes the payload segment
//! to recover subject, issuer, audiences, scopes and expiry, then applies the
//! expiry and (optional) audience checks. Signatures are never checked here.
//!
//! Parsing never panics and never returns an error to the gate: anything
//! unreadable becomes [`TokenValidationResult::Invalid`] with code
//! `invalid_token`.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};

use crate::config::ValidationConfig;
use crate::error::{AuthError, Result};

/// base64url that accepts padded and unpadded input and encodes without padding
pub(crate) const BASE64URL_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Scope claim names tried after the configured one
const FALLBACK_SCOPE_CLAIMS: [&str; 3] = ["scope", "scp", "scopes"];

/// Claims recovered from an accepted bearer token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedToken {
    /// Granted scopes
    pub scopes: Vec<String>,
    /// `sub` claim
    pub subject: Option<String>,
    /// `aud` claim, normalised to a list
    pub audiences: Vec<String>,
    /// `iss` claim
    pub issuer: Option<String>,
    /// `exp` claim
    pub expires_at: Option<DateTime<Utc>>,
}

impl ValidatedToken {
    /// Case-insensitive scope check
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s.eq_ignore_ascii_case(scope))
    }
}

/// Outcome of [`JwtClaimExtractor::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidationResult {
    /// Token accepted
    Valid(ValidatedToken),
    /// Token rejected
    Invalid {
        /// OAuth error code, always `invalid_token`
        error_code: String,
        /// Caller-safe description
        error_description: String,
    },
}

impl TokenValidationResult {
    fn invalid(description: impl Into<String>) -> Self {
        Self::Invalid {
            error_code: "invalid_token".to_string(),
            error_description: description.into(),
        }
    }

    /// Whether the token was accepted
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Extracts and checks claims from unverified JWTs
#[derive(Debug, Clone, Default)]
pub struct JwtClaimExtractor {
    config: ValidationConfig,
}

impl JwtClaimExtractor {
    /// Create an extractor
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Decode the payload segment of `token` into its raw claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the token has fewer than two
    /// segments, the payload is not base64url, or it is not a JSON object.
    pub fn decode_claims(token: &str) -> Result<Map<String, Value>> {
        let mut segments = token.split('.');
        let (Some(_header), Some(payload)) = (segments.next(), segments.next()) else {
            return Err(AuthError::InvalidToken("token is not a JWT".to_string()));
        };

        let bytes = BASE64URL_LENIENT
            .decode(payload)
            .map_err(|_| AuthError::InvalidToken("payload is not base64url".to_string()))?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(claims)) => Ok(claims),
            Ok(_) => Err(AuthError::InvalidToken(
                "payload is not a JSON object".to_string(),
            )),
            Err(_) => Err(AuthError::InvalidToken("payload is not JSON".to_string())),
        }
    }

    /// Extract claims from `token` and apply the expiry and audience checks
    pub fn validate(&self, token: &str) -> TokenValidationResult {
        self.validate_at(token, Utc::now())
    }

    fn validate_at(&self, token: &str, now: DateTime<Utc>) -> TokenValidationResult {
        let claims = match Self::decode_claims(token) {
            Ok(claims) => claims,
            Err(AuthError::InvalidToken(reason)) => return TokenValidationResult::invalid(reason),
            Err(_) => return TokenValidationResult::invalid("token could not be parsed"),
        };

        let expires_at = match claims.get("exp") {
            None | Some(Value::Null) => None,
            Some(value) => match value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)) {
                Some(exp) => match DateTime::from_timestamp(exp, 0) {
                    Some(exp) => Some(exp),
                    None => return TokenValidationResult::invalid("exp claim is out of range"),
                },
                None => return TokenValidationResult::invalid("exp claim is not numeric"),
            },
        };

        // an expiry plus skew past chrono's range never expires
        if let Some(exp) = expires_at
            && let Some(deadline) = i64::try_from(self.config.clock_skew_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|skew| exp.checked_add_signed(skew))
            && deadline < now
        {
            return TokenValidationResult::invalid("token has expired");
        }

        let audiences = string_list(claims.get("aud"));
        if self.config.validate_audience
            && let Some(expected) = self.config.expected_audience.as_deref()
            && !audiences.iter().any(|aud| aud.eq_ignore_ascii_case(expected))
        {
            return TokenValidationResult::invalid("token audience does not match this resource");
        }

        TokenValidationResult::Valid(ValidatedToken {
            scopes: self.extract_scopes(&claims),
            subject: claims.get("sub").and_then(Value::as_str).map(str::to_string),
            audiences,
            issuer: claims.get("iss").and_then(Value::as_str).map(str::to_string),
            expires_at,
        })
    }

    fn extract_scopes(&self, claims: &Map<String, Value>) -> Vec<String> {
        std::iter::once(self.config.scope_claim.as_str())
            .chain(FALLBACK_SCOPE_CLAIMS)
            .find_map(|name| match claims.get(name) {
                Some(value @ (Value::String(_) | Value::Array(_))) => Some(string_list(Some(value))),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// A string is space-split, an array keeps its string members
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
