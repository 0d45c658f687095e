//! Static credential strategies
//!
//! Stateless: each call injects the same credential and never touches the
//! token store.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use super::{AuthProvider, set_authorization, set_bearer};
use crate::context::AuthRequestContext;
use crate::error::{AuthError, Result};

/// Where an API key is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyLocation {
    /// Request header with this name
    Header(String),
    /// Query parameter with this name
    Query(String),
}

/// Sends a fixed API key in a header or query parameter
#[derive(Debug, Clone)]
pub struct ApiKeyProvider {
    name: String,
    key: SecretString,
    location: ApiKeyLocation,
}

impl ApiKeyProvider {
    /// Create the provider
    pub fn new(name: impl Into<String>, key: impl Into<String>, location: ApiKeyLocation) -> Self {
        Self {
            name: name.into(),
            key: SecretString::new(key.into()),
            location,
        }
    }
}

#[async_trait]
impl AuthProvider for ApiKeyProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, _ctx: &AuthRequestContext, request: &mut reqwest::Request) -> Result<()> {
        let key = self.key.expose_secret();
        match &self.location {
            ApiKeyLocation::Header(header) => {
                let name = HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
                    AuthError::configuration(format!("invalid API key header name '{}'", header))
                })?;
                let mut value = HeaderValue::from_str(key).map_err(|_| {
                    AuthError::configuration("API key contains characters not allowed in a header")
                })?;
                value.set_sensitive(true);
                request.headers_mut().insert(name, value);
            }
            ApiKeyLocation::Query(param) => {
                request.url_mut().query_pairs_mut().append_pair(param, key);
            }
        }
        Ok(())
    }
}

/// Sends a fixed bearer token
#[derive(Debug, Clone)]
pub struct BearerProvider {
    name: String,
    token: SecretString,
}

impl BearerProvider {
    /// Create the provider
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: SecretString::new(token.into()),
        }
    }
}

#[async_trait]
impl AuthProvider for BearerProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, _ctx: &AuthRequestContext, request: &mut reqwest::Request) -> Result<()> {
        set_bearer(request, self.token.expose_secret())
    }
}

/// HTTP Basic authentication (RFC 7617)
#[derive(Debug, Clone)]
pub struct BasicAuthProvider {
    name: String,
    username: String,
    password: SecretString,
}

impl BasicAuthProvider {
    /// Create the provider
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

#[async_trait]
impl AuthProvider for BasicAuthProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, _ctx: &AuthRequestContext, request: &mut reqwest::Request) -> Result<()> {
        let credentials = format!("{}:{}", self.username, self.password.expose_secret());
        set_authorization(request, &format!("Basic {}", STANDARD.encode(credentials)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{authorization, request};

    #[tokio::test]
    async fn test_api_key_header() {
        let provider = ApiKeyProvider::new("k", "key-123", ApiKeyLocation::Header("X-API-Key".into()));
        let mut req = request();
        provider.apply(&AuthRequestContext::new("s"), &mut req).await.unwrap();
        assert_eq!(req.headers().get("x-api-key").unwrap(), "key-123");
        assert!(req.headers().get("x-api-key").unwrap().is_sensitive());
    }

    #[tokio::test]
    async fn test_api_key_query() {
        let provider = ApiKeyProvider::new("k", "a b&c", ApiKeyLocation::Query("api_key".into()));
        let mut req = request();
        provider.apply(&AuthRequestContext::new("s"), &mut req).await.unwrap();
        assert_eq!(req.url().query(), Some("api_key=a+b%26c"));
    }

    #[tokio::test]
    async fn test_bearer_and_basic() {
        let ctx = AuthRequestContext::new("s");

        let mut req = request();
        BearerProvider::new("b", "tok").apply(&ctx, &mut req).await.unwrap();
        assert_eq!(authorization(&req).as_deref(), Some("Bearer tok"));

        let mut req = request();
        BasicAuthProvider::new("basic", "Aladdin", "open sesame")
            .apply(&ctx, &mut req)
            .await
            .unwrap();
        assert_eq!(
            authorization(&req).as_deref(),
            Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==")
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let provider = BasicAuthProvider::new("basic", "user", "hunter2");
        assert!(!format!("{:?}", provider).contains("hunter2"));
    }
}
