//! Token endpoint client

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, Result};
use crate::token::TokenData;

/// Form parameters for a token or device request.
///
/// The `resource` parameter is appended whenever one is configured.
#[derive(Clone, Default)]
pub struct TokenRequest {
    params: Vec<(&'static str, String)>,
}

// Form values include codes, verifiers and secrets
impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.params.iter().map(|(k, _)| k))
            .finish()
    }
}

impl TokenRequest {
    /// Request for `grant_type`
    pub fn grant(grant_type: &str) -> Self {
        Self::default().param("grant_type", grant_type)
    }

    /// Request without a grant type (device authorization)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter
    pub fn param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.params.push((name, value.into()));
        self
    }

    /// Add a parameter when present
    pub fn optional(self, name: &'static str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    /// Add a parameter when present and non-empty
    pub fn non_empty(self, name: &'static str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.param(name, value)
        }
    }

    /// Add the RFC 8707 resource indicator when configured
    pub fn resource(self, resource: Option<&str>) -> Self {
        self.optional("resource", resource)
    }

    /// Value of a parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    fn as_form(&self) -> &[(&'static str, String)] {
        &self.params
    }
}

/// OAuth error response body (RFC 6749 Section 5.2)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OAuthErrorBody {
    /// Error code, e.g. `invalid_grant` or `authorization_pending`
    #[serde(default)]
    pub error: Option<String>,
    /// Human-readable description
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    /// Whether the error code equals `code`
    pub fn is(&self, code: &str) -> bool {
        self.error.as_deref() == Some(code)
    }
}

#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Successful token response (RFC 6749 Section 5.1)
#[derive(Clone)]
pub struct TokenResponse {
    /// Issued access token
    pub access_token: String,
    /// Token type, normally `Bearer`
    pub token_type: Option<String>,
    /// Lifetime in seconds
    pub expires_in: Option<u64>,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// OpenID Connect ID token
    pub id_token: Option<String>,
    /// Granted scopes
    pub scope: Option<String>,
}

// Manual Debug impl to prevent token exposure in logs
impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    /// Build stored token data, keeping `previous_refresh` when the response
    /// did not rotate the refresh token.
    pub fn into_token_data(self, previous_refresh: Option<String>) -> TokenData {
        let mut token = TokenData::new(self.access_token);
        token.refresh_token = self.refresh_token.or(previous_refresh);
        token.id_token = self.id_token;
        match self.expires_in {
            Some(seconds) => token.with_expires_in(seconds),
            None => token,
        }
    }
}

/// Device authorization response (RFC 8628 Section 3.2)
#[derive(Clone, Deserialize)]
pub struct DeviceAuthorization {
    /// Code the client polls with
    pub device_code: String,
    /// Code the user enters
    pub user_code: String,
    /// Where the user enters the code
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    /// Verification URI with the user code embedded
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Lifetime of the codes in seconds
    pub expires_in: u64,
    /// Minimum polling interval in seconds
    #[serde(default)]
    pub interval: Option<u64>,
}

impl std::fmt::Debug for DeviceAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAuthorization")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Outcome of a token endpoint call that reached the server
#[derive(Debug)]
pub enum TokenEndpointReply {
    /// 2xx with an access token
    Issued(TokenResponse),
    /// Non-2xx with whatever OAuth error body could be parsed
    Rejected {
        /// HTTP status
        status: u16,
        /// Parsed error body
        body: OAuthErrorBody,
    },
}

/// HTTP client for token, refresh and device authorization endpoints
#[derive(Clone)]
pub struct TokenEndpointClient {
    http: reqwest::Client,
}

impl std::fmt::Debug for TokenEndpointClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEndpointClient")
            .field("http", &"<reqwest::Client>")
            .finish()
    }
}

impl TokenEndpointClient {
    /// Create a client that does not follow redirects and times out after 30s.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Use an existing reqwest client.
    ///
    /// The client should be configured with `redirect::Policy::none()`.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn post(
        &self,
        endpoint: &str,
        request: &TokenRequest,
        cancel: &CancellationToken,
    ) -> Result<(u16, Vec<u8>)> {
        let send = async {
            let response = self
                .http
                .post(endpoint)
                .header(reqwest::header::ACCEPT, "application/json")
                .form(request.as_form())
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, AuthError>((status, body.to_vec()))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            result = send => result,
        }
    }

    /// Send a token request and classify the reply.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Upstream`] if the server is unreachable or a 2xx body
    ///   lacks `access_token`
    /// - [`AuthError::Cancelled`] if `cancel` fires first
    pub async fn request_token(
        &self,
        endpoint: &str,
        request: &TokenRequest,
        cancel: &CancellationToken,
    ) -> Result<TokenEndpointReply> {
        let (status, body) = self.post(endpoint, request, cancel).await?;

        if !(200..300).contains(&status) {
            let body = serde_json::from_slice::<OAuthErrorBody>(&body).unwrap_or_default();
            return Ok(TokenEndpointReply::Rejected { status, body });
        }

        let raw: RawTokenResponse = serde_json::from_slice(&body).map_err(|_| {
            AuthError::upstream(status, "token endpoint returned a malformed body")
        })?;

        let access_token = raw
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuthError::upstream(status, "token response did not include an access_token")
            })?;

        Ok(TokenEndpointReply::Issued(TokenResponse {
            access_token,
            token_type: raw.token_type,
            expires_in: raw.expires_in,
            refresh_token: raw.refresh_token,
            id_token: raw.id_token,
            scope: raw.scope,
        }))
    }

    /// Send a token request, treating any rejection as an error.
    ///
    /// # Errors
    ///
    /// As [`TokenEndpointClient::request_token`], plus [`AuthError::Upstream`]
    /// for non-2xx replies.
    pub async fn exchange(
        &self,
        endpoint: &str,
        request: &TokenRequest,
        cancel: &CancellationToken,
    ) -> Result<TokenResponse> {
        match self.request_token(endpoint, request, cancel).await? {
            TokenEndpointReply::Issued(response) => Ok(response),
            TokenEndpointReply::Rejected { status, body } => Err(rejection(status, body)),
        }
    }

    /// Request a device and user code pair.
    ///
    /// # Errors
    ///
    /// [`AuthError::Upstream`] for network failures, non-2xx replies or a
    /// malformed body; [`AuthError::Cancelled`] if `cancel` fires first.
    pub async fn device_authorization(
        &self,
        endpoint: &str,
        request: &TokenRequest,
        cancel: &CancellationToken,
    ) -> Result<DeviceAuthorization> {
        let (status, body) = self.post(endpoint, request, cancel).await?;
        if !(200..300).contains(&status) {
            let body = serde_json::from_slice::<OAuthErrorBody>(&body).unwrap_or_default();
            return Err(rejection(status, body));
        }
        serde_json::from_slice(&body)
            .map_err(|_| AuthError::upstream(status, "device authorization response is malformed"))
    }
}

/// Convert a rejected reply into an upstream error
pub(crate) fn rejection(status: u16, body: OAuthErrorBody) -> AuthError {
    AuthError::Upstream {
        status: Some(status),
        description: body
            .error_description
            .unwrap_or_else(|| "token request rejected".to_string()),
        error: body.error,
    }
}
