//! OAuth 2.0 token endpoint plumbing
//!
//! This module provides the wire side of the grant strategies:
//! - form-encoded token, refresh and device requests (RFC 6749, RFC 8628)
//! - the RFC 8707 `resource` parameter on every request when configured
//! - OAuth error body parsing
//! - PKCE verifier and S256 challenge generation (RFC 7636)
//!
//! ## Submodules
//!
//! - `endpoint` - `TokenEndpointClient` and response types
//! - `pkce` - PKCE pair generation

pub mod endpoint;
pub mod pkce;

pub use endpoint::{
    DeviceAuthorization, OAuthErrorBody, TokenEndpointClient, TokenEndpointReply, TokenRequest,
    TokenResponse,
};
pub use pkce::PkcePair;

/// Grant type URN for device code polling (RFC 8628 Section 3.4)
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
