//! Pass-through bearer forwarding

use async_trait::async_trait;
use secrecy::ExposeSecret;

use super::{AuthProvider, set_bearer};
use crate::context::AuthRequestContext;
use crate::error::{AuthError, Result};

/// Forwards the caller's inbound bearer token verbatim
#[derive(Debug, Clone)]
pub struct PassThroughProvider {
    name: String,
}

impl PassThroughProvider {
    /// Create the provider
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AuthProvider for PassThroughProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// # Errors
    ///
    /// [`AuthError::LoginRequired`] when the context carries no bearer.
    async fn apply(&self, ctx: &AuthRequestContext, request: &mut reqwest::Request) -> Result<()> {
        match &ctx.pass_through {
            Some(bearer) => set_bearer(request, bearer.expose_secret()),
            None => Err(AuthError::LoginRequired {
                provider: self.name.clone(),
            }),
        }
    }
}
