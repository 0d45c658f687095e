//! Client credentials grant (RFC 6749 Section 4.4)

use async_trait::async_trait;
use tracing::info;

use super::managed::{Cached, ManagedTokens, ProviderDeps};
use super::{AuthProvider, set_bearer};
use crate::config::{GrantType, OAuthProviderConfig};
use crate::context::{AuthRequestContext, session_tag};
use crate::error::{AuthError, Result};
use crate::oauth2::TokenRequest;
use crate::token::TokenData;

/// Machine-to-machine tokens, cached per session
pub struct ClientCredentialsProvider {
    tokens: ManagedTokens,
}

impl std::fmt::Debug for ClientCredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsProvider")
            .field("name", &self.tokens.config.name)
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsProvider {
    /// Create the provider.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `config` is not a complete
    /// client credentials configuration.
    pub fn new(config: OAuthProviderConfig, deps: ProviderDeps) -> Result<Self> {
        if config.grant != GrantType::ClientCredentials {
            return Err(AuthError::configuration(format!(
                "provider '{}' is not configured for client_credentials",
                config.name
            )));
        }
        config.validate()?;
        Ok(Self {
            tokens: ManagedTokens::new(config, deps),
        })
    }

    /// Request a fresh token from the token endpoint, bypassing the cache.
    ///
    /// # Errors
    ///
    /// [`AuthError::Upstream`] on network failure or rejection,
    /// [`AuthError::Cancelled`] on cancellation.
    pub async fn fetch_token(&self, ctx: &AuthRequestContext) -> Result<TokenData> {
        let config = &self.tokens.config;
        let request = self
            .tokens
            .client_auth(TokenRequest::grant("client_credentials"))
            .non_empty("scope", &config.scope_param())
            .resource(config.resource.as_deref());

        let response = self
            .tokens
            .deps
            .endpoint
            .exchange(&config.token_endpoint, &request, &ctx.cancellation)
            .await?;
        Ok(response.into_token_data(None))
    }
}

#[async_trait]
impl AuthProvider for ClientCredentialsProvider {
    fn name(&self) -> &str {
        self.tokens.name()
    }

    async fn apply(&self, ctx: &AuthRequestContext, request: &mut reqwest::Request) -> Result<()> {
        let bearer = match self.tokens.cached_or_refreshed(ctx).await? {
            Cached::Usable(bearer) => bearer,
            Cached::Absent { session } => {
                let token = self.fetch_token(ctx).await?;
                info!(provider = self.name(), session = %session_tag(&session), grant = "client_credentials", "Token acquired");
                let bearer = token.access_token.clone();
                self.tokens.persist(&session, token).await?;
                bearer
            }
        };
        set_bearer(request, &bearer)
    }
}
