//! Tower Layer for the challenge gate

use std::sync::Arc;
use tower::Layer;

use super::service::GateService;
use crate::server::ChallengeGate;

/// Tower Layer that puts a [`ChallengeGate`] in front of a service
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use restmcp_auth::tower::GateLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(GateLayer::new(gate))
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct GateLayer {
    gate: Arc<ChallengeGate>,
}

impl GateLayer {
    /// Create a layer owning `gate`
    pub fn new(gate: ChallengeGate) -> Self {
        Self {
            gate: Arc::new(gate),
        }
    }

    /// Create a layer from a shared gate
    pub fn from_arc(gate: Arc<ChallengeGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for GateLayer {
    type Service = GateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GateService::new(inner, Arc::clone(&self.gate))
    }
}
