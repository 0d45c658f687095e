//! Shared token lifecycle for OAuth strategies

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::OAuthProviderConfig;
use crate::context::{AuthRequestContext, session_tag};
use crate::error::{AuthError, Result};
use crate::oauth2::{TokenEndpointClient, TokenRequest};
use crate::session::SessionIdentityMap;
use crate::store::{TokenLookup, TokenStore};
use crate::token::TokenData;

/// Collaborators every managed strategy needs
#[derive(Clone)]
pub struct ProviderDeps {
    /// Token persistence
    pub store: Arc<dyn TokenStore>,
    /// Handle to principal map
    pub sessions: Arc<SessionIdentityMap>,
    /// Token endpoint HTTP client
    pub endpoint: TokenEndpointClient,
}

impl std::fmt::Debug for ProviderDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDeps")
            .field("sessions", &self.sessions.len())
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ProviderDeps {
    /// Bundle collaborators
    pub fn new(
        store: Arc<dyn TokenStore>,
        sessions: Arc<SessionIdentityMap>,
        endpoint: TokenEndpointClient,
    ) -> Self {
        Self {
            store,
            sessions,
            endpoint,
        }
    }
}

/// Result of steps 1-3 of the decision order
pub(crate) enum Cached {
    /// Bearer to send
    Usable(String),
    /// Nothing usable; the full grant should run for `session`
    Absent { session: String },
}

pub(crate) struct ManagedTokens {
    pub(crate) config: OAuthProviderConfig,
    pub(crate) deps: ProviderDeps,
}

impl ManagedTokens {
    pub(crate) fn new(config: OAuthProviderConfig, deps: ProviderDeps) -> Self {
        Self { config, deps }
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    /// Pass-through, then cache, then refresh.
    ///
    /// Only cancellation and storage failures escape; a failed refresh
    /// deletes the stale token and reports [`Cached::Absent`].
    pub(crate) async fn cached_or_refreshed(&self, ctx: &AuthRequestContext) -> Result<Cached> {
        if let Some(bearer) = &ctx.pass_through {
            return Ok(Cached::Usable(bearer.expose_secret().clone()));
        }

        let session = self.deps.sessions.resolve(&ctx.session_key);
        let stored = match self.deps.store.get(&session, self.name()).await {
            TokenLookup::Found(token) => token,
            TokenLookup::Missing => return Ok(Cached::Absent { session }),
            TokenLookup::Invalid(reason) => {
                warn!(provider = self.name(), session = %session_tag(&session), %reason, "Stored token unreadable, treating as missing");
                return Ok(Cached::Absent { session });
            }
        };

        if stored.is_usable() {
            debug!(provider = self.name(), session = %session_tag(&session), "Using cached token");
            return Ok(Cached::Usable(stored.access_token));
        }

        let Some(refresh_token) = stored.refresh_token.clone() else {
            return Ok(Cached::Absent { session });
        };

        match self.refresh(ctx, &refresh_token).await {
            Ok(token) => {
                info!(provider = self.name(), session = %session_tag(&session), grant = "refresh_token", "Token refreshed");
                let access = token.access_token.clone();
                self.deps.store.save(&session, self.name(), token).await?;
                Ok(Cached::Usable(access))
            }
            Err(AuthError::Cancelled) => Err(AuthError::Cancelled),
            Err(e) => {
                warn!(provider = self.name(), session = %session_tag(&session), error_code = e.error_code(), error = %e, "Token refresh failed, discarding stored token");
                self.deps.store.delete(&session, self.name()).await?;
                Ok(Cached::Absent { session })
            }
        }
    }

    async fn refresh(&self, ctx: &AuthRequestContext, refresh_token: &str) -> Result<TokenData> {
        let request = self
            .client_auth(TokenRequest::grant("refresh_token"))
            .param("refresh_token", refresh_token)
            .resource(self.config.resource.as_deref());

        let response = self
            .deps
            .endpoint
            .exchange(&self.config.token_endpoint, &request, &ctx.cancellation)
            .await?;
        Ok(response.into_token_data(Some(refresh_token.to_string())))
    }

    /// Add `client_id` and, for confidential clients, `client_secret`
    pub(crate) fn client_auth(&self, request: TokenRequest) -> TokenRequest {
        let request = request.param("client_id", self.config.client_id.clone());
        match &self.config.client_secret {
            Some(secret) => request.param("client_secret", secret.expose_secret().clone()),
            None => request,
        }
    }

    pub(crate) async fn persist(&self, session: &str, token: TokenData) -> Result<()> {
        self.deps.store.save(session, self.name(), token).await
    }
}
