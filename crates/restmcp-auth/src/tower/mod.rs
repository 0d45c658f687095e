//! # Tower middleware for the challenge gate
//!
//! [`GateLayer`] wraps any `http::Request<B>` service with a
//! [`ChallengeGate`](crate::server::ChallengeGate):
//!
//! - the metadata path is answered directly with the Protected Resource
//!   Metadata document
//! - other bypass paths go straight to the inner service
//! - challenged calls get a 401 or 403 with `WWW-Authenticate` and a JSON body
//! - accepted calls carry [`ValidatedToken`](crate::jwt::ValidatedToken) and
//!   [`InboundBearer`] in their extensions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use restmcp_auth::tower::GateLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(GateLayer::new(gate))
//!     .service(my_http_handler);
//! ```
//!
//! Tool-level scope checks need the tool name. Services that parse it before
//! the gate runs (for example a routing layer) attach a [`ToolName`]
//! extension.

mod layer;
mod service;

pub use layer::GateLayer;
pub use service::{GateService, GateServiceFuture};

use secrecy::SecretString;

/// Tool targeted by the request, read by [`GateService`] for scope checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolName(pub String);

/// Raw inbound bearer, inserted for pass-through strategies
#[derive(Debug, Clone)]
pub struct InboundBearer(pub SecretString);
