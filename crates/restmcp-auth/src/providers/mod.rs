//! Authentication strategies
//!
//! Each strategy implements [`AuthProvider`]: decorate an outgoing
//! `reqwest::Request` with credentials. Managed OAuth strategies share one
//! decision order (see `managed`):
//!
//! 1. forward the context's pass-through bearer, if any
//! 2. use the stored token for the resolved session if it is still usable
//! 3. refresh it if a refresh token exists, deleting it when refresh fails
//! 4. run the strategy's full grant and persist the result
//!
//! - [`AuthorizationCodeProvider`] - browser login with PKCE; never starts a
//!   login from `apply`
//! - [`DeviceCodeProvider`] - RFC 8628 device login
//! - [`ClientCredentialsProvider`] - machine-to-machine token
//! - [`PassThroughProvider`] - forwards the inbound bearer only
//! - [`ApiKeyProvider`], [`BearerProvider`], [`BasicAuthProvider`] - static
//!   credentials, no token store

mod authorization_code;
mod client_credentials;
mod device_code;
mod managed;
mod pass_through;
mod static_auth;

pub use authorization_code::{
    AuthorizationCodeProvider, AuthorizationRequest, CallbackOutcome, CallbackResponse,
    LoginPrompt,
};
pub use client_credentials::ClientCredentialsProvider;
pub use device_code::{DeviceCodeProvider, DevicePrompt};
pub use managed::ProviderDeps;
pub use pass_through::PassThroughProvider;
pub use static_auth::{ApiKeyLocation, ApiKeyProvider, BasicAuthProvider, BearerProvider};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};

use crate::context::AuthRequestContext;
use crate::error::{AuthError, Result};

/// Decorates outgoing requests with credentials
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Provider name, also the token store key
    fn name(&self) -> &str;

    /// Add credentials to `request`.
    ///
    /// # Errors
    ///
    /// Strategy specific; see each provider.
    async fn apply(&self, ctx: &AuthRequestContext, request: &mut reqwest::Request) -> Result<()>;
}

/// Set `Authorization` to `value`, marked sensitive so it is never logged
pub(crate) fn set_authorization(request: &mut reqwest::Request, value: &str) -> Result<()> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        AuthError::InvalidToken("credential contains characters not allowed in a header".to_string())
    })?;
    header.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, header);
    Ok(())
}

/// Set `Authorization: Bearer <token>`
pub(crate) fn set_bearer(request: &mut reqwest::Request, token: &str) -> Result<()> {
    set_authorization(request, &format!("Bearer {}", token))
}
