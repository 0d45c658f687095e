//! Server-side challenge gate
//!
//! This module answers every inbound call with one of:
//! - bypass, for the metadata, health and login paths
//! - proceed, carrying the validated claims and raw bearer
//! - a 401 challenge (missing or invalid token) or a 403
//!   `insufficient_scope` challenge
//!
//! It also builds the Protected Resource Metadata document (RFC 9728) and the
//! `WWW-Authenticate` header values (RFC 6750 Section 3).

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{AuthConfig, METADATA_PATH};
use crate::error::Result;
use crate::jwt::{JwtClaimExtractor, TokenValidationResult, ValidatedToken};
use crate::registry::OAuthProviderRegistry;
use crate::scope::{ScopeCheck, ScopeRequirementEngine};

/// Protected Resource Metadata (RFC 9728 Section 2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedResourceMetadata {
    /// Canonical resource identifier
    pub resource: String,
    /// Authorization servers that issue tokens for this resource
    pub authorization_servers: Vec<String>,
    /// Scopes this resource understands
    pub scopes_supported: Vec<String>,
    /// How bearer tokens may be presented
    pub bearer_methods_supported: Vec<String>,
}

/// Protected Resource Metadata builder
#[derive(Debug, Clone)]
pub struct ProtectedResourceMetadataBuilder {
    resource: String,
    authorization_servers: Vec<String>,
    scopes: Vec<String>,
}

impl ProtectedResourceMetadataBuilder {
    /// Create a new metadata builder
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            authorization_servers: Vec::new(),
            scopes: Vec::new(),
        }
    }

    /// Set the authorization servers
    pub fn with_authorization_servers(mut self, servers: Vec<String>) -> Self {
        self.authorization_servers = servers;
        self
    }

    /// Set supported scopes
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Build the metadata document
    pub fn build(self) -> ProtectedResourceMetadata {
        ProtectedResourceMetadata {
            resource: self.resource,
            authorization_servers: self.authorization_servers,
            scopes_supported: self.scopes,
            bearer_methods_supported: vec!["header".to_string()],
        }
    }
}

/// `WWW-Authenticate: Bearer ...` header builder.
///
/// Parameters are emitted in insertion order; values escape `\` and `"`.
#[derive(Debug, Clone, Default)]
pub struct WwwAuthenticateBuilder {
    params: Vec<(&'static str, String)>,
}

impl WwwAuthenticateBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter
    pub fn param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.params.push((name, value.into()));
        self
    }

    /// Append `scope` when `scopes` is non-empty
    pub fn scopes(self, scopes: &[String]) -> Self {
        if scopes.is_empty() {
            self
        } else {
            self.param("scope", scopes.join(" "))
        }
    }

    /// Build the header value
    ///
    /// Produces a header like:
    /// ```text
    /// Bearer resource_metadata="https://api.example.com/.well-known/oauth-protected-resource", error="invalid_token"
    /// ```
    pub fn build(self) -> String {
        if self.params.is_empty() {
            return "Bearer".to_string();
        }
        let params = self
            .params
            .iter()
            .map(|(name, value)| format!("{}=\"{}\"", name, escape_quoted(value)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("Bearer {}", params)
    }
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Extract the token from an `Authorization: Bearer <token>` value.
///
/// The scheme is case-insensitive. Anything else yields `None`.
pub fn extract_bearer(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() && !token.contains(' '))
        .then_some(token)
}

/// Metadata URL for `resource` (RFC 9728 Section 3.1).
///
/// The well-known segment goes between the origin and the resource path.
pub fn metadata_url(resource: Option<&str>) -> String {
    let Some(parsed) = resource.and_then(|r| url::Url::parse(r).ok()) else {
        return METADATA_PATH.to_string();
    };
    let path = parsed.path().trim_end_matches('/');
    format!(
        "{}{}{}",
        parsed.origin().ascii_serialization(),
        METADATA_PATH,
        path
    )
}

/// Inbound call as seen by the gate
#[derive(Debug, Clone, Copy, Default)]
pub struct GateRequest<'a> {
    /// Request path
    pub path: &'a str,
    /// Raw `Authorization` header value
    pub authorization: Option<&'a str>,
    /// Tool being invoked, if the call is a tool call
    pub tool_name: Option<&'a str>,
}

/// A 401 or 403 response
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChallenge {
    /// 401 or 403
    pub status: u16,
    /// `WWW-Authenticate` header value
    pub www_authenticate: String,
    /// JSON body `{error, error_description}`
    pub body: Value,
    /// Scopes the token lacked, for 403
    pub missing_scopes: Vec<String>,
}

impl AuthChallenge {
    /// Serialised body
    pub fn body_string(&self) -> String {
        self.body.to_string()
    }
}

/// Gate outcome
#[derive(Debug)]
pub enum GateDecision {
    /// Well-known path; no authentication applies
    Bypass,
    /// Let the call through
    Proceed {
        /// Validated claims, when validation ran
        token: Option<ValidatedToken>,
        /// Inbound bearer, for pass-through strategies
        bearer: Option<SecretString>,
    },
    /// Reject the call
    Challenge(AuthChallenge),
}

/// Answers inbound calls: pass, 401 challenge, or 403 insufficient scope
#[derive(Debug, Clone)]
pub struct ChallengeGate {
    config: Arc<AuthConfig>,
    extractor: JwtClaimExtractor,
    scopes: ScopeRequirementEngine,
    metadata_url: String,
}

impl ChallengeGate {
    /// Create a gate from configuration.
    ///
    /// # Errors
    ///
    /// Fails if a scope requirement pattern does not compile.
    pub fn new(config: Arc<AuthConfig>, registry: Arc<OAuthProviderRegistry>) -> Result<Self> {
        let mut scopes = ScopeRequirementEngine::new(
            config.scopes.default_required.clone(),
            config.scopes.requirements.clone(),
        )?;
        if config.scopes.include_provider_scopes {
            scopes = scopes.include_provider_scopes(registry);
        }

        Ok(Self {
            extractor: JwtClaimExtractor::new(config.validation.clone()),
            metadata_url: metadata_url(config.resource.as_deref()),
            scopes,
            config,
        })
    }

    /// URL advertised as `resource_metadata`
    pub fn metadata_url(&self) -> &str {
        &self.metadata_url
    }

    /// Scope engine used for tool checks
    pub fn scope_engine(&self) -> &ScopeRequirementEngine {
        &self.scopes
    }

    /// Protected Resource Metadata for this server
    pub fn metadata(&self) -> ProtectedResourceMetadata {
        ProtectedResourceMetadataBuilder::new(self.config.resource.clone().unwrap_or_default())
            .with_authorization_servers(self.config.authorization_servers.clone())
            .with_scopes(self.scopes.known_scopes())
            .build()
    }

    /// Decide what to do with `request`
    pub fn evaluate(&self, request: GateRequest<'_>) -> GateDecision {
        if self.config.is_bypass_path(request.path) {
            return GateDecision::Bypass;
        }

        let bearer = request.authorization.and_then(extract_bearer);
        let secret = || bearer.map(|b| SecretString::new(b.to_string()));

        if !self.config.enabled {
            return GateDecision::Proceed {
                token: None,
                bearer: secret(),
            };
        }

        let Some(token) = bearer else {
            debug!(path = request.path, "No bearer token, issuing challenge");
            return GateDecision::Challenge(self.unauthorized(None));
        };

        if !self.config.validation.enabled {
            return GateDecision::Proceed {
                token: None,
                bearer: secret(),
            };
        }

        let validated = match self.extractor.validate(token) {
            TokenValidationResult::Valid(validated) => validated,
            TokenValidationResult::Invalid {
                error_code,
                error_description,
            } => {
                debug!(path = request.path, %error_code, %error_description, "Bearer token rejected");
                let required = self.check(request.tool_name, &[]).required;
                return GateDecision::Challenge(self.unauthorized(Some((
                    &error_code,
                    &error_description,
                    &required,
                ))));
            }
        };

        let check = self.check(request.tool_name, &validated.scopes);
        if !check.is_satisfied() {
            debug!(
                path = request.path,
                tool = request.tool_name,
                missing = ?check.missing,
                "Token lacks required scopes"
            );
            return GateDecision::Challenge(self.insufficient_scope(&check));
        }

        GateDecision::Proceed {
            token: Some(validated),
            bearer: secret(),
        }
    }

    fn check(&self, tool_name: Option<&str>, scopes: &[String]) -> ScopeCheck {
        match tool_name {
            Some(tool) => self.scopes.validate_scopes_for_tool(tool, scopes),
            None => self.scopes.validate_base_scopes(scopes),
        }
    }

    fn unauthorized(&self, rejected: Option<(&str, &str, &[String])>) -> AuthChallenge {
        let header = WwwAuthenticateBuilder::new().param("resource_metadata", self.metadata_url.clone());
        match rejected {
            None => AuthChallenge {
                status: 401,
                www_authenticate: header.build(),
                body: json!({
                    "error": "unauthorized",
                    "error_description": "Bearer token required",
                }),
                missing_scopes: Vec::new(),
            },
            Some((code, description, scopes)) => AuthChallenge {
                status: 401,
                www_authenticate: header
                    .param("error", code)
                    .param("error_description", description)
                    .scopes(scopes)
                    .build(),
                body: json!({
                    "error": code,
                    "error_description": description,
                }),
                missing_scopes: Vec::new(),
            },
        }
    }

    fn insufficient_scope(&self, check: &ScopeCheck) -> AuthChallenge {
        let scopes = check.challenge_scopes();
        let description = format!("Token lacks required scopes: {}", scopes.join(" "));
        AuthChallenge {
            status: 403,
            www_authenticate: WwwAuthenticateBuilder::new()
                .param("error", "insufficient_scope")
                .param("error_description", description.clone())
                .param("resource_metadata", self.metadata_url.clone())
                .scopes(&scopes)
                .build(),
            body: json!({
                "error": "insufficient_scope",
                "error_description": description,
            }),
            missing_scopes: scopes,
        }
    }
}
