//! Device authorization grant (RFC 8628)
//!
//! The poll loop runs inline in the caller's future. Every sleep and every
//! token request races the context's cancellation token, so dropping or
//! cancelling the call stops polling immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::managed::{Cached, ManagedTokens, ProviderDeps};
use super::{AuthProvider, set_bearer};
use crate::config::{GrantType, OAuthProviderConfig};
use crate::context::{AuthRequestContext, session_tag};
use crate::error::{AuthError, Result};
use crate::oauth2::endpoint::rejection;
use crate::oauth2::{
    DEVICE_CODE_GRANT, DeviceAuthorization, TokenEndpointReply, TokenRequest, TokenResponse,
};
use crate::token::TokenData;

/// Interval used when the server does not send one
const DEFAULT_POLL_INTERVAL: u64 = 5;

/// Added to the interval on every `slow_down`
const SLOW_DOWN_STEP: u64 = 5;

/// Shows the user code and verification URI to the user
#[async_trait]
pub trait DevicePrompt: Send + Sync {
    /// Present `authorization` to the user.
    ///
    /// # Errors
    ///
    /// An error aborts the login before polling starts.
    async fn show(&self, authorization: &DeviceAuthorization) -> Result<()>;
}

enum PollOutcome {
    Issued(TokenResponse),
    Pending,
    SlowDown,
}

/// Device code login, used as the full grant of `apply`
pub struct DeviceCodeProvider {
    tokens: ManagedTokens,
    prompt: Arc<dyn DevicePrompt>,
}

impl std::fmt::Debug for DeviceCodeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodeProvider")
            .field("name", &self.tokens.config.name)
            .finish_non_exhaustive()
    }
}

impl DeviceCodeProvider {
    /// Create the provider.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `config` is not a complete
    /// device code configuration.
    pub fn new(
        config: OAuthProviderConfig,
        deps: ProviderDeps,
        prompt: Arc<dyn DevicePrompt>,
    ) -> Result<Self> {
        if config.grant != GrantType::DeviceCode {
            return Err(AuthError::configuration(format!(
                "provider '{}' is not configured for device_code",
                config.name
            )));
        }
        config.validate()?;
        Ok(Self {
            tokens: ManagedTokens::new(config, deps),
            prompt,
        })
    }

    /// Run the device login: request codes, prompt the user, poll until the
    /// user approves.
    ///
    /// The token is returned but not persisted.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ExpiredCode`] when the code lifetime elapses or the
    ///   server reports `expired_token`
    /// - [`AuthError::Upstream`] for `access_denied` and any other error
    /// - [`AuthError::Cancelled`] when `ctx` is cancelled
    pub async fn perform_device_login(&self, ctx: &AuthRequestContext) -> Result<TokenData> {
        let config = &self.tokens.config;
        let device_endpoint = config.device_authorization_endpoint.as_deref().ok_or_else(|| {
            AuthError::configuration(format!(
                "provider '{}' has no device_authorization_endpoint",
                config.name
            ))
        })?;

        let request = TokenRequest::new()
            .param("client_id", config.client_id.clone())
            .non_empty("scope", &config.scope_param())
            .resource(config.resource.as_deref());
        let authorization = self
            .tokens
            .deps
            .endpoint
            .device_authorization(device_endpoint, &request, &ctx.cancellation)
            .await?;

        self.prompt.show(&authorization).await?;

        let interval = authorization.interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        let response = poll_until_issued(
            authorization.expires_in,
            interval,
            ctx.cancellation.clone(),
            || self.poll(ctx, &authorization),
            self.name(),
        )
        .await?;
        Ok(response.into_token_data(None))
    }

    async fn poll(
        &self,
        ctx: &AuthRequestContext,
        authorization: &DeviceAuthorization,
    ) -> Result<PollOutcome> {
        let config = &self.tokens.config;
        let request = self
            .tokens
            .client_auth(TokenRequest::grant(DEVICE_CODE_GRANT))
            .param("device_code", authorization.device_code.clone())
            .resource(config.resource.as_deref());

        let reply = self
            .tokens
            .deps
            .endpoint
            .request_token(&config.token_endpoint, &request, &ctx.cancellation)
            .await?;

        match reply {
            TokenEndpointReply::Issued(response) => Ok(PollOutcome::Issued(response)),
            TokenEndpointReply::Rejected { body, .. } if body.is("authorization_pending") => {
                Ok(PollOutcome::Pending)
            }
            TokenEndpointReply::Rejected { body, .. } if body.is("slow_down") => {
                Ok(PollOutcome::SlowDown)
            }
            TokenEndpointReply::Rejected { body, .. } if body.is("expired_token") => {
                Err(AuthError::ExpiredCode)
            }
            TokenEndpointReply::Rejected { status, body } => Err(rejection(status, body)),
        }
    }
}

/// Poll every `interval` seconds until a token is issued or `expires_in`
/// elapses. A lifetime beyond the clock's range has no deadline.
async fn poll_until_issued<F, Fut>(
    expires_in: u64,
    mut interval: u64,
    cancellation: CancellationToken,
    mut poll: F,
    provider: &str,
) -> Result<TokenResponse>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome>>,
{
    let deadline = Instant::now().checked_add(Duration::from_secs(expires_in));

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(AuthError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(AuthError::ExpiredCode);
        }

        match poll().await? {
            PollOutcome::Issued(response) => return Ok(response),
            PollOutcome::Pending => {
                debug!(provider, "Device authorization pending");
            }
            PollOutcome::SlowDown => {
                interval = interval.saturating_add(SLOW_DOWN_STEP);
                debug!(provider, interval, "Device poll slowed down");
            }
        }
    }
}

#[async_trait]
impl AuthProvider for DeviceCodeProvider {
    fn name(&self) -> &str {
        self.tokens.name()
    }

    async fn apply(&self, ctx: &AuthRequestContext, request: &mut reqwest::Request) -> Result<()> {
        let bearer = match self.tokens.cached_or_refreshed(ctx).await? {
            Cached::Usable(bearer) => bearer,
            Cached::Absent { session } => {
                let token = self.perform_device_login(ctx).await?;
                // the login may have raced an upgrade of this session
                let session = self.tokens.deps.sessions.resolve(&session);
                info!(provider = self.name(), session = %session_tag(&session), grant = "device_code", "Device login completed");
                let bearer = token.access_token.clone();
                self.tokens.persist(&session, token).await?;
                bearer
            }
        };
        set_bearer(request, &bearer)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn issued() -> PollOutcome {
        PollOutcome::Issued(TokenResponse {
            access_token: "device-token".to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3600),
            refresh_token: None,
            id_token: None,
            scope: None,
        })
    }

    /// Replays `outcomes` in order and records when each poll happened
    struct Script {
        outcomes: Mutex<Vec<PollOutcome>>,
        polled_at: Mutex<Vec<Instant>>,
    }

    impl Script {
        fn new(mut outcomes: Vec<PollOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                polled_at: Mutex::new(Vec::new()),
            }
        }

        async fn next(&self) -> Result<PollOutcome> {
            self.polled_at.lock().unwrap().push(Instant::now());
            Ok(self.outcomes.lock().unwrap().pop().unwrap_or(PollOutcome::Pending))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_down_widens_interval() {
        let script = Script::new(vec![
            PollOutcome::SlowDown,
            PollOutcome::Pending,
            issued(),
        ]);
        let start = Instant::now();

        let response =
            poll_until_issued(600, 2, CancellationToken::new(), || script.next(), "tv")
                .await
                .unwrap();

        assert_eq!(response.access_token, "device-token");
        let offsets: Vec<u64> = script
            .polled_at
            .lock()
            .unwrap()
            .iter()
            .map(|at| at.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![2, 9, 16]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_lifetime_elapses() {
        let script = Script::new(Vec::new());

        let err = poll_until_issued(12, 5, CancellationToken::new(), || script.next(), "tv")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ExpiredCode));
        // polls at 5 s and 10 s; the wake at 15 s is past the deadline
        assert_eq!(script.polled_at.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_lifetime_has_no_deadline() {
        let script = Script::new(vec![PollOutcome::Pending, issued()]);
        let response =
            poll_until_issued(u64::MAX, 1, CancellationToken::new(), || script.next(), "tv")
                .await
                .unwrap();
        assert_eq!(response.access_token, "device-token");
        assert_eq!(script.polled_at.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let script = Script::new(Vec::new());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();

        let (result, ()) = tokio::join!(
            poll_until_issued(600, 5, cancel, || script.next(), "tv"),
            async move {
                tokio::time::sleep(Duration::from_secs(7)).await;
                canceller.cancel();
            }
        );

        assert!(matches!(result.unwrap_err(), AuthError::Cancelled));
        assert_eq!(script.polled_at.lock().unwrap().len(), 1);
    }
}
