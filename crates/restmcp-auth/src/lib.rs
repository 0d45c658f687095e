//! # restmcp-auth - OAuth token lifecycle for REST-backed MCP tools
//!
//! Authentication and token management for servers that expose REST/OpenAPI
//! operations as MCP tools. Inbound calls are gated on bearer scopes, and
//! outbound calls are decorated with credentials obtained through one of
//! several OAuth grants.
//!
//! ## Key Features
//!
//! - **Grant strategies** - authorization code + PKCE, device code (RFC 8628),
//!   client credentials, pass-through bearer, plus static API key, bearer and
//!   basic credentials
//! - **Token lifecycle** - cache hit, refresh with a 60 second safety window,
//!   and fallback to a full grant
//! - **Encrypted persistence** - AES-256-GCM token files, one per session and
//!   provider
//! - **Signed state** - HMAC-SHA256 state blobs for redirect CSRF protection
//! - **Session upgrade** - temporary session handles promoted to a principal
//!   after login
//! - **Scope gating** - glob-based tool requirements, RFC 6750 challenges and
//!   RFC 9728 protected-resource metadata
//!
//! ## Architecture
//!
//! - [`token`] - `TokenData` value type
//! - [`store`] - `TokenStore` contract, memory and encrypted file stores
//! - [`session`] - session handle to principal mapping
//! - [`state`] - signed state codec
//! - [`oauth2`] - token endpoint client and PKCE
//! - [`providers`] - `AuthProvider` strategies
//! - [`jwt`] - claim extraction from bearer tokens
//! - [`scope`] - scope requirement engine
//! - [`registry`] - shared OAuth provider registry
//! - [`server`] - challenge gate and metadata
//! - [`config`] - `AuthConfig` loading and validation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use restmcp_auth::{
//!     AuthConfig, AuthProvider, AuthRequestContext, ClientCredentialsProvider, FileTokenStore,
//!     ProviderDeps, SessionIdentityMap, TokenEndpointClient,
//! };
//!
//! # async fn run() -> restmcp_auth::Result<()> {
//! let config = AuthConfig::from_file("auth.toml")?;
//! config.validate()?;
//!
//! let root = config.token_store_root().unwrap_or_else(|| "tokens".into());
//! let deps = ProviderDeps::new(
//!     Arc::new(FileTokenStore::new(root)),
//!     Arc::new(SessionIdentityMap::new()),
//!     TokenEndpointClient::new()?,
//! );
//!
//! let Some(billing) = config.provider("billing").cloned() else {
//!     return Ok(());
//! };
//! let provider = ClientCredentialsProvider::new(billing, deps)?;
//!
//! let mut request = reqwest::Request::new(
//!     reqwest::Method::GET,
//!     "https://billing.example.com/v1/invoices".parse().expect("static url"),
//! );
//! provider.apply(&AuthRequestContext::new("service"), &mut request).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `middleware` - Tower `GateLayer` applying the challenge gate to
//!   `http::Request`s (`tower` is an alias)
//! - `full` - All features enabled
//!
//! ## Standards Compliance
//!
//! - **RFC 6749** - OAuth 2.0 Authorization Framework
//! - **RFC 6750** - Bearer Token Usage
//! - **RFC 7636** - Proof Key for Code Exchange (PKCE)
//! - **RFC 8628** - Device Authorization Grant
//! - **RFC 8707** - Resource Indicators
//! - **RFC 9728** - Protected Resource Metadata

pub mod config;
pub mod context;
pub mod error;
pub mod jwt;
pub mod oauth2;
pub mod providers;
pub mod registry;
pub mod scope;
pub mod server;
pub mod session;
pub mod state;
pub mod store;
pub mod token;

#[cfg(feature = "middleware")]
pub mod tower;

#[doc(inline)]
pub use config::{AuthConfig, GrantType, OAuthProviderConfig, ScopeConfig, ValidationConfig};

#[doc(inline)]
pub use context::AuthRequestContext;

#[doc(inline)]
pub use error::{AuthError, Result};

#[doc(inline)]
pub use jwt::{JwtClaimExtractor, TokenValidationResult, ValidatedToken};

#[doc(inline)]
pub use oauth2::{PkcePair, TokenEndpointClient};

#[doc(inline)]
pub use providers::*;

#[doc(inline)]
pub use registry::OAuthProviderRegistry;

#[doc(inline)]
pub use scope::{ScopeCheck, ScopeRequirement, ScopeRequirementEngine};

#[doc(inline)]
pub use server::{
    AuthChallenge, ChallengeGate, GateDecision, GateRequest, ProtectedResourceMetadata,
};

#[doc(inline)]
pub use session::{SessionIdentityMap, UpgradeOutcome};

#[doc(inline)]
pub use state::{SignedState, SignedStateCodec};

#[doc(inline)]
pub use store::{FileTokenStore, MemoryTokenStore, TokenLookup, TokenStore};

#[doc(inline)]
pub use token::TokenData;
