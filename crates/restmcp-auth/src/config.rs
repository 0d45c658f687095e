//! Authentication configuration
//!
//! [`AuthConfig`] is the single configuration root. It is usually loaded
//! with [`AuthConfig::from_file`], which layers `RESTMCP__*` environment
//! variables over a TOML, YAML or JSON file, and then checked with
//! [`AuthConfig::validate`] before any provider is built.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::scope::{ScopeRequirement, ScopeRequirementEngine};
use crate::state::{MIN_STATE_SECRET_LEN, SignedStateCodec};
use crate::store::FileTokenStore;

/// Path prefix of the protected-resource metadata document
pub const METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "RESTMCP";

/// Authentication configuration root
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable the challenge gate
    pub enabled: bool,
    /// Hide diagnostic detail from callback pages and challenges
    pub production: bool,
    /// Canonical resource URL of this server (RFC 8707 / RFC 9728)
    pub resource: Option<String>,
    /// Authorization servers advertised in resource metadata
    pub authorization_servers: Vec<String>,
    /// HMAC secret for signed state, at least 32 bytes
    pub state_secret: Option<SecretString>,
    /// Maximum age of signed state in seconds
    pub state_max_age_secs: u64,
    /// Token directory, defaults to `<data-local-dir>/restmcp/tokens`
    pub token_dir: Option<PathBuf>,
    /// Inbound bearer validation
    pub validation: ValidationConfig,
    /// Scope requirements
    pub scopes: ScopeConfig,
    /// Paths that skip the gate, in addition to the metadata path
    pub bypass_paths: Vec<String>,
    /// OAuth providers
    pub providers: Vec<OAuthProviderConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            production: true,
            resource: None,
            authorization_servers: Vec::new(),
            state_secret: None,
            state_max_age_secs: crate::state::DEFAULT_STATE_MAX_AGE.as_secs(),
            token_dir: None,
            validation: ValidationConfig::default(),
            scopes: ScopeConfig::default(),
            bypass_paths: default_bypass_paths(),
            providers: Vec::new(),
        }
    }
}

fn default_bypass_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/oauth/login".to_string(),
        "/oauth/callback".to_string(),
    ]
}

/// Inbound bearer token validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Check bearer tokens and enforce scopes
    pub enabled: bool,
    /// Claim holding scopes, tried before `scope`, `scp` and `scopes`
    pub scope_claim: String,
    /// Tolerance applied to `exp`
    pub clock_skew_secs: u64,
    /// Require `aud` to contain `expected_audience`
    pub validate_audience: bool,
    /// Audience this resource accepts
    pub expected_audience: Option<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scope_claim: "scope".to_string(),
            clock_skew_secs: 60,
            validate_audience: false,
            expected_audience: None,
        }
    }
}

/// Scope requirement settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Scopes every tool call requires
    pub default_required: Vec<String>,
    /// Also require every scope declared by a registered provider
    pub include_provider_scopes: bool,
    /// Per-tool requirements
    pub requirements: Vec<ScopeRequirement>,
}

/// OAuth grant used by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization code with PKCE
    AuthorizationCode,
    /// Device authorization grant (RFC 8628)
    DeviceCode,
    /// Client credentials
    ClientCredentials,
    /// Forward the inbound bearer token
    PassThrough,
}

impl GrantType {
    /// Configuration name of the grant
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::DeviceCode => "device_code",
            Self::ClientCredentials => "client_credentials",
            Self::PassThrough => "pass_through",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of a single OAuth provider
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderConfig {
    /// Unique provider name, also the token store key
    pub name: String,
    /// Grant used to obtain tokens
    pub grant: GrantType,
    /// OAuth client id
    #[serde(default)]
    pub client_id: String,
    /// OAuth client secret, for confidential clients
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    /// Authorization endpoint
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint
    #[serde(default)]
    pub token_endpoint: String,
    /// Device authorization endpoint
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
    /// Redirect URI registered with the provider
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Requested scopes, scope name to description
    #[serde(default)]
    pub scopes: BTreeMap<String, String>,
    /// RFC 8707 resource indicator sent with every token request
    #[serde(default)]
    pub resource: Option<String>,
    /// Use PKCE for the authorization code grant
    #[serde(default = "default_true")]
    pub use_pkce: bool,
}

fn default_true() -> bool {
    true
}

impl OAuthProviderConfig {
    /// Minimal provider configuration
    pub fn new(
        name: impl Into<String>,
        grant: GrantType,
        client_id: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            grant,
            client_id: client_id.into(),
            client_secret: None,
            authorization_endpoint: None,
            token_endpoint: token_endpoint.into(),
            device_authorization_endpoint: None,
            redirect_uri: None,
            scopes: BTreeMap::new(),
            resource: None,
            use_pkce: true,
        }
    }

    /// Set the client secret
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Set the authorization endpoint
    pub fn with_authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.authorization_endpoint = Some(endpoint.into());
        self
    }

    /// Set the device authorization endpoint
    pub fn with_device_authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.device_authorization_endpoint = Some(endpoint.into());
        self
    }

    /// Set the redirect URI
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Add a requested scope
    pub fn with_scope(mut self, scope: impl Into<String>, description: impl Into<String>) -> Self {
        self.scopes.insert(scope.into(), description.into());
        self
    }

    /// Set the resource indicator
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Enable or disable PKCE
    pub fn with_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    /// Requested scopes joined for the `scope` parameter
    pub fn scope_param(&self) -> String {
        self.scopes.keys().cloned().collect::<Vec<_>>().join(" ")
    }

    /// Check that the endpoints the grant needs are present.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] naming the missing field.
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| {
            AuthError::configuration(format!(
                "provider '{}' ({}) requires {}",
                self.name, self.grant, field
            ))
        };

        if self.name.trim().is_empty() {
            return Err(AuthError::configuration("provider name must not be empty"));
        }
        if self.grant != GrantType::PassThrough {
            if self.client_id.is_empty() {
                return Err(missing("client_id"));
            }
            if self.token_endpoint.is_empty() {
                return Err(missing("token_endpoint"));
            }
        }
        match self.grant {
            GrantType::AuthorizationCode => {
                if self.authorization_endpoint.is_none() {
                    return Err(missing("authorization_endpoint"));
                }
                if self.redirect_uri.is_none() {
                    return Err(missing("redirect_uri"));
                }
            }
            GrantType::DeviceCode => {
                if self.device_authorization_endpoint.is_none() {
                    return Err(missing("device_authorization_endpoint"));
                }
            }
            GrantType::ClientCredentials => {
                if self.client_secret.is_none() {
                    return Err(missing("client_secret"));
                }
            }
            GrantType::PassThrough => {}
        }
        Ok(())
    }
}

impl AuthConfig {
    /// Load configuration from a file with `RESTMCP` environment overrides.
    ///
    /// The format follows the extension (`toml`, `yaml`/`yml`, `json`).
    /// Nested keys use `__`, for example `RESTMCP__VALIDATION__CLOCK_SKEW_SECS=30`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use restmcp_auth::AuthConfig;
    ///
    /// let config = AuthConfig::from_file("auth.toml")?;
    /// config.validate()?;
    /// # Ok::<(), restmcp_auth::AuthError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The file format is unsupported
    /// - The file contains invalid configuration
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(AuthError::configuration(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(AuthError::configuration(
                    "unsupported configuration format, expected toml, yaml or json",
                ));
            }
        };

        let path_str = path
            .to_str()
            .ok_or_else(|| AuthError::configuration("configuration path is not valid UTF-8"))?;

        let config = Config::builder()
            .add_source(File::new(path_str, format))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Fail fast on inconsistent configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if:
    /// - The state secret is shorter than 32 bytes
    /// - An authorization code provider exists without a state secret
    /// - A provider misses an endpoint its grant needs
    /// - Two providers share a name
    /// - A scope requirement pattern is empty or does not compile
    pub fn validate(&self) -> Result<()> {
        if let Some(secret) = &self.state_secret
            && secret.expose_secret().len() < MIN_STATE_SECRET_LEN
        {
            return Err(AuthError::configuration(format!(
                "state_secret must be at least {} bytes",
                MIN_STATE_SECRET_LEN
            )));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !names.insert(provider.name.as_str()) {
                return Err(AuthError::configuration(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            if provider.grant == GrantType::AuthorizationCode && self.state_secret.is_none() {
                return Err(AuthError::configuration(format!(
                    "provider '{}' uses authorization_code and requires state_secret",
                    provider.name
                )));
            }
        }

        ScopeRequirementEngine::new(
            self.scopes.default_required.clone(),
            self.scopes.requirements.clone(),
        )?;
        Ok(())
    }

    /// Signed state codec, when a state secret is configured.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the secret is too short.
    pub fn state_codec(&self) -> Result<Option<SignedStateCodec>> {
        self.state_secret
            .clone()
            .map(|secret| {
                SignedStateCodec::new(secret)
                    .map(|codec| codec.with_max_age(Duration::from_secs(self.state_max_age_secs)))
            })
            .transpose()
    }

    /// Directory for [`FileTokenStore`]
    pub fn token_store_root(&self) -> Option<PathBuf> {
        self.token_dir.clone().or_else(FileTokenStore::default_root)
    }

    /// Provider by name
    pub fn provider(&self, name: &str) -> Option<&OAuthProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Whether `path` skips the gate
    pub fn is_bypass_path(&self, path: &str) -> bool {
        path.starts_with(METADATA_PATH) || self.bypass_paths.iter().any(|p| p == path)
    }
}
