//! Per-call authentication context.
//!
//! Every strategy call receives an [`AuthRequestContext`] that carries the
//! caller's session key, an optional inbound bearer token to forward, and a
//! cancellation token. Nothing is read from ambient or thread-local state.
//!
//! # Example
//!
//! ```rust
//! use restmcp_auth::context::AuthRequestContext;
//!
//! let ctx = AuthRequestContext::new("session-h1")
//!     .with_pass_through("inbound-bearer");
//!
//! assert_eq!(ctx.session_key, "session-h1");
//! assert!(ctx.pass_through.is_some());
//! ```

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context for a single authenticated outbound call.
#[derive(Clone)]
pub struct AuthRequestContext {
    /// Unique identifier for log correlation
    pub request_id: String,
    /// Session handle or principal the call belongs to
    pub session_key: String,
    /// Inbound bearer token to forward verbatim
    pub pass_through: Option<SecretString>,
    /// Cancels interactive waits and token endpoint calls
    pub cancellation: CancellationToken,
}

impl std::fmt::Debug for AuthRequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequestContext")
            .field("request_id", &self.request_id)
            .field("session", &session_tag(&self.session_key))
            .field("pass_through", &self.pass_through.as_ref().map(|_| "[REDACTED]"))
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl AuthRequestContext {
    /// Create a context for `session_key` with a fresh request id.
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            session_key: session_key.into(),
            pass_through: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Forward `token` instead of consulting the token store.
    pub fn with_pass_through(mut self, token: impl Into<String>) -> Self {
        self.pass_through = Some(SecretString::new(token.into()));
        self
    }

    /// Forward an already-wrapped secret, if any.
    pub fn with_pass_through_secret(mut self, token: Option<SecretString>) -> Self {
        self.pass_through = token;
        self
    }

    /// Use a caller-owned cancellation token.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Override the request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Whether the caller already gave up on this call.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Short, non-reversible tag for a session key, used in log fields.
pub(crate) fn session_tag(session_key: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(session_key.as_bytes());
    format!("{:x}", digest)[..12].to_string()
}
