//! Authorization code grant with PKCE (RFC 6749 Section 4.1, RFC 7636)
//!
//! A login has two halves that may run on different tasks:
//!
//! 1. [`AuthorizationCodeProvider::build_authorization_url`] signs the state,
//!    stores the PKCE verifier and returns the URL for the browser.
//! 2. [`AuthorizationCodeProvider::handle_authorization_callback`] verifies
//!    the state, exchanges the code, upgrades the session and persists.
//!
//! [`AuthorizationCodeProvider::login`] ties both together for callers that
//! can wait: it hands the URL to a [`LoginPrompt`] and resolves when the
//! matching callback arrives.
//!
//! `apply` never starts a login. Without a usable token it fails with
//! [`AuthError::LoginRequired`] so the caller can run the login tool.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use super::managed::{Cached, ManagedTokens, ProviderDeps};
use super::{AuthProvider, set_bearer};
use crate::config::{GrantType, OAuthProviderConfig};
use crate::context::{AuthRequestContext, session_tag};
use crate::error::{AuthError, Result};
use crate::jwt::JwtClaimExtractor;
use crate::oauth2::{PkcePair, TokenRequest};
use crate::session::UpgradeOutcome;
use crate::state::{SignedState, SignedStateCodec};
use crate::store::TokenLookup;
use crate::token::TokenData;

const PKCE_PREFIX: &str = "pkce_";

/// Presents an authorization URL to the user
#[async_trait]
pub trait LoginPrompt: Send + Sync {
    /// Show or open `authorization_url`.
    ///
    /// # Errors
    ///
    /// An error aborts the login.
    async fn open(&self, authorization_url: &str) -> Result<()>;
}

/// A prepared authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// URL to send the user to
    pub url: String,
    /// Nonce of the signed state, identifies the callback
    pub nonce: String,
}

/// Result of a successful callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    /// Session key the token was stored under
    pub session_key: String,
    /// Provider the token belongs to
    pub provider_name: String,
    /// Whether this callback upgraded the session to a principal
    pub upgraded: bool,
}

/// What a callback endpoint should send back to the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    /// HTTP status
    pub status: u16,
    /// Whether the login completed
    pub success: bool,
    /// Message for the user; generic in production mode
    pub message: String,
}

type LoginResult = std::result::Result<String, AuthError>;

/// Authorization code strategy
pub struct AuthorizationCodeProvider {
    tokens: ManagedTokens,
    codec: SignedStateCodec,
    session_upgrade: bool,
    production: bool,
    cancellation: CancellationToken,
    pending: DashMap<String, oneshot::Sender<LoginResult>>,
}

impl std::fmt::Debug for AuthorizationCodeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeProvider")
            .field("name", &self.tokens.config.name)
            .field("use_pkce", &self.tokens.config.use_pkce)
            .field("session_upgrade", &self.session_upgrade)
            .field("pending_logins", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Removes a pending login registration when the waiting future ends
struct PendingLogin<'a> {
    pending: &'a DashMap<String, oneshot::Sender<LoginResult>>,
    nonce: String,
}

impl Drop for PendingLogin<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.nonce);
    }
}

impl AuthorizationCodeProvider {
    /// Create the provider.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `config` is not a complete
    /// authorization code configuration.
    pub fn new(
        config: OAuthProviderConfig,
        deps: ProviderDeps,
        codec: SignedStateCodec,
    ) -> Result<Self> {
        if config.grant != GrantType::AuthorizationCode {
            return Err(AuthError::configuration(format!(
                "provider '{}' is not configured for authorization_code",
                config.name
            )));
        }
        config.validate()?;
        Ok(Self {
            tokens: ManagedTokens::new(config, deps),
            codec,
            session_upgrade: true,
            production: true,
            cancellation: CancellationToken::new(),
            pending: DashMap::new(),
        })
    }

    /// Upgrade the session to the ID token's `sub` after login.
    ///
    /// The ID token signature is not verified, so the upgrade trusts the
    /// token endpoint response. Disable this when the token endpoint is not
    /// reached over an authenticated channel.
    pub fn with_session_upgrade(mut self, enabled: bool) -> Self {
        self.session_upgrade = enabled;
        self
    }

    /// Abort in-flight code exchanges when `cancellation` fires, e.g. on
    /// server shutdown. Callbacks carry no request context of their own.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Show detailed callback diagnostics when `false`
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    fn redirect_uri(&self) -> Result<&str> {
        self.tokens.config.redirect_uri.as_deref().ok_or_else(|| {
            AuthError::configuration(format!(
                "provider '{}' has no redirect_uri",
                self.tokens.config.name
            ))
        })
    }

    /// Build the URL that starts a browser login for `ctx`'s session.
    ///
    /// When PKCE is enabled the verifier is stored under
    /// `(session_key, "pkce_" + nonce)` until the callback consumes it.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint URL is invalid or the verifier cannot be stored.
    pub async fn build_authorization_url(
        &self,
        ctx: &AuthRequestContext,
    ) -> Result<AuthorizationRequest> {
        let config = &self.tokens.config;
        let redirect_uri = self.redirect_uri()?;
        let endpoint = config.authorization_endpoint.as_deref().ok_or_else(|| {
            AuthError::configuration(format!(
                "provider '{}' has no authorization_endpoint",
                config.name
            ))
        })?;
        let mut url = Url::parse(endpoint).map_err(|e| {
            AuthError::configuration(format!("invalid authorization_endpoint: {}", e))
        })?;

        let state = SignedState::new(&ctx.session_key, redirect_uri, &config.name);
        let encoded_state = self.codec.encode(&state)?;

        let pkce = if config.use_pkce {
            let pair = PkcePair::generate();
            self.tokens
                .deps
                .store
                .save(
                    &ctx.session_key,
                    &pkce_key(&state.nonce),
                    TokenData::new(pair.verifier.clone()),
                )
                .await?;
            Some(pair)
        } else {
            None
        };

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &config.client_id)
                .append_pair("redirect_uri", redirect_uri);
            let scope = config.scope_param();
            if !scope.is_empty() {
                query.append_pair("scope", &scope);
            }
            query.append_pair("state", &encoded_state);
            if let Some(pair) = &pkce {
                query
                    .append_pair("code_challenge", &pair.challenge)
                    .append_pair("code_challenge_method", PkcePair::METHOD);
            }
            if let Some(resource) = &config.resource {
                query.append_pair("resource", resource);
            }
        }

        Ok(AuthorizationRequest {
            url: url.into(),
            nonce: state.nonce,
        })
    }

    /// Complete a login from the callback's `code` and `state`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidState`] if the state does not verify, belongs to
    ///   another provider, or its PKCE verifier is gone
    /// - [`AuthError::InvalidState`] if the session handle is already bound
    ///   to a different principal than the ID token names; nothing is stored
    /// - [`AuthError::Upstream`] if the code exchange fails
    /// - [`AuthError::Cancelled`] if the provider's cancellation token fires
    pub async fn handle_authorization_callback(
        &self,
        code: &str,
        state: &str,
    ) -> Result<CallbackOutcome> {
        let state = match self.codec.decode(state) {
            Ok(state) => state,
            Err(e) => {
                warn!(provider = self.name(), error = %e, "Rejected authorization callback state");
                return Err(e);
            }
        };

        let result = self.complete_callback(code, &state).await;
        self.notify(&state.nonce, &result);
        result
    }

    async fn complete_callback(&self, code: &str, state: &SignedState) -> Result<CallbackOutcome> {
        let config = &self.tokens.config;
        if state.provider_name != config.name {
            return Err(AuthError::invalid_state(
                "state was issued for another provider",
                Some(format!(
                    "expected '{}', got '{}'",
                    config.name, state.provider_name
                )),
            ));
        }

        let store = &self.tokens.deps.store;
        let pkce_name = pkce_key(&state.nonce);
        let verifier = if config.use_pkce {
            match store.get(&state.session_key, &pkce_name).await {
                TokenLookup::Found(entry) => Some(entry.access_token),
                TokenLookup::Missing | TokenLookup::Invalid(_) => {
                    return Err(AuthError::invalid_state(
                        "login session not found or already used",
                        Some("PKCE verifier missing".to_string()),
                    ));
                }
            }
        } else {
            None
        };

        let request = self
            .tokens
            .client_auth(TokenRequest::grant("authorization_code"))
            .param("code", code)
            .param("redirect_uri", state.redirect_uri.clone())
            .optional("code_verifier", verifier.as_deref())
            .resource(config.resource.as_deref());

        let token = self
            .tokens
            .deps
            .endpoint
            .exchange(&config.token_endpoint, &request, &self.cancellation)
            .await?
            .into_token_data(None);

        let mut upgraded = false;
        if self.session_upgrade
            && let Some(id_token) = &token.id_token
        {
            match JwtClaimExtractor::decode_claims(id_token) {
                Ok(claims) => {
                    if let Some(sub) = claims.get("sub").and_then(|v| v.as_str()) {
                        match self.tokens.deps.sessions.upgrade(&state.session_key, sub) {
                            UpgradeOutcome::Upgraded => upgraded = true,
                            UpgradeOutcome::AlreadyUpgraded => {}
                            UpgradeOutcome::Conflict { existing } => {
                                // the exchanged code is spent either way
                                if config.use_pkce {
                                    store.delete(&state.session_key, &pkce_name).await?;
                                }
                                return Err(AuthError::invalid_state(
                                    "session already belongs to another user",
                                    Some(format!(
                                        "bound to {}, login returned {}",
                                        session_tag(&existing),
                                        session_tag(sub)
                                    )),
                                ));
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(provider = self.name(), error = %e, "ID token unreadable, session not upgraded");
                }
            }
        }

        let session_key = self.tokens.deps.sessions.resolve(&state.session_key);
        self.tokens.persist(&session_key, token).await?;
        if config.use_pkce {
            store.delete(&state.session_key, &pkce_name).await?;
        }

        info!(provider = self.name(), session = %session_tag(&session_key), grant = "authorization_code", upgraded, "Authorization code login completed");
        Ok(CallbackOutcome {
            session_key,
            provider_name: config.name.clone(),
            upgraded,
        })
    }

    fn notify(&self, nonce: &str, result: &Result<CallbackOutcome>) {
        if let Some((_, waiter)) = self.pending.remove(nonce) {
            let message = match result {
                Ok(outcome) => Ok(outcome.session_key.clone()),
                Err(e) => Err(e.replicate()),
            };
            // the waiter may have timed out in the meantime
            let _ = waiter.send(message);
        }
    }

    /// Handle a callback request from its query parameters.
    ///
    /// Never fails: errors become a [`CallbackResponse`] whose message is
    /// generic in production mode and detailed otherwise.
    pub async fn handle_callback_query(&self, params: &HashMap<String, String>) -> CallbackResponse {
        if let Some(error) = params.get("error") {
            let description = params.get("error_description").cloned();
            let err = AuthError::Upstream {
                status: None,
                error: Some(error.clone()),
                description: description.unwrap_or_else(|| "authorization denied".to_string()),
            };
            if let Some(raw_state) = params.get("state")
                && let Ok(state) = self.codec.decode(raw_state)
            {
                self.notify(&state.nonce, &Err(err.replicate()));
            }
            return self.failure(&err);
        }

        let (Some(code), Some(state)) = (params.get("code"), params.get("state")) else {
            return self.failure(&AuthError::invalid_state(
                "callback is missing code or state",
                None,
            ));
        };

        match self.handle_authorization_callback(code, state).await {
            Ok(_) => CallbackResponse {
                status: 200,
                success: true,
                message: "Login complete. You can close this window.".to_string(),
            },
            Err(e) => self.failure(&e),
        }
    }

    fn failure(&self, err: &AuthError) -> CallbackResponse {
        let status = match err {
            AuthError::InvalidState { .. } => 400,
            AuthError::Upstream { .. } => 502,
            _ => 500,
        };
        let message = if self.production {
            "Login failed. Please start the login again.".to_string()
        } else {
            match err {
                AuthError::InvalidState {
                    reason,
                    diagnostic: Some(diagnostic),
                } => format!("{}: {} ({})", err.error_code(), reason, diagnostic),
                _ => format!("{}: {}", err.error_code(), err),
            }
        };
        CallbackResponse {
            status,
            success: false,
            message,
        }
    }

    /// Run an interactive login and wait for its callback.
    ///
    /// Returns the session key the token was stored under.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Timeout`] if no callback arrives within `timeout`
    /// - [`AuthError::Cancelled`] if `ctx` is cancelled
    /// - any error the prompt or the callback produced
    pub async fn login(
        &self,
        ctx: &AuthRequestContext,
        prompt: &dyn LoginPrompt,
        timeout: Duration,
    ) -> Result<String> {
        let request = self.build_authorization_url(ctx).await?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request.nonce.clone(), tx);
        let _registration = PendingLogin {
            pending: &self.pending,
            nonce: request.nonce.clone(),
        };

        let result = async {
            prompt.open(&request.url).await?;
            info!(provider = self.name(), session = %session_tag(&ctx.session_key), "Waiting for authorization callback");

            tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => Err(AuthError::Cancelled),
                _ = tokio::time::sleep(timeout) => Err(AuthError::Timeout(timeout.as_secs())),
                outcome = rx => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(AuthError::Cancelled),
                },
            }
        }
        .await;

        // an abandoned login leaves its verifier behind
        if result.is_err() && self.tokens.config.use_pkce {
            let pkce_name = pkce_key(&request.nonce);
            if let Err(e) = self.tokens.deps.store.delete(&ctx.session_key, &pkce_name).await {
                warn!(provider = self.name(), error = %e, "Failed to remove PKCE verifier");
            }
        }
        result
    }

    /// Number of logins currently waiting for a callback
    pub fn pending_logins(&self) -> usize {
        self.pending.len()
    }
}

fn pkce_key(nonce: &str) -> String {
    format!("{}{}", PKCE_PREFIX, nonce)
}

#[async_trait]
impl AuthProvider for AuthorizationCodeProvider {
    fn name(&self) -> &str {
        self.tokens.name()
    }

    /// # Errors
    ///
    /// [`AuthError::LoginRequired`] when no usable token exists, including
    /// after a failed refresh.
    async fn apply(&self, ctx: &AuthRequestContext, request: &mut reqwest::Request) -> Result<()> {
        match self.tokens.cached_or_refreshed(ctx).await? {
            Cached::Usable(bearer) => set_bearer(request, &bearer),
            Cached::Absent { .. } => Err(AuthError::LoginRequired {
                provider: self.name().to_string(),
            }),
        }
    }
}
