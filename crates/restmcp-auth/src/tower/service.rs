//! Tower Service for the challenge gate
//!
//! Works on `http::Request<B>` for any body, and builds its own responses
//! through `ResBody: From<String>`.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use tower_service::Service;

use super::{InboundBearer, ToolName};
use crate::config::METADATA_PATH;
use crate::server::{AuthChallenge, ChallengeGate, GateDecision, GateRequest};

/// Tower Service that answers with a challenge or forwards to `inner`
#[derive(Debug, Clone)]
pub struct GateService<S> {
    inner: S,
    gate: Arc<ChallengeGate>,
}

impl<S> GateService<S> {
    /// Create a new gate service
    pub fn new(inner: S, gate: Arc<ChallengeGate>) -> Self {
        Self { inner, gate }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Future returned by [`GateService`]
pub type GateServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

fn json_response<ResBody: From<String>>(status: StatusCode, body: String) -> http::Response<ResBody> {
    let mut response = http::Response::new(ResBody::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn challenge_response<ResBody: From<String>>(challenge: AuthChallenge) -> http::Response<ResBody> {
    let status = StatusCode::from_u16(challenge.status).unwrap_or(StatusCode::UNAUTHORIZED);
    let mut response = json_response(status, challenge.body_string());
    if let Ok(value) = HeaderValue::from_str(&challenge.www_authenticate) {
        response.headers_mut().insert(WWW_AUTHENTICATE, value);
    }
    response
}

impl<S, B, ResBody> Service<http::Request<B>> for GateService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = GateServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let path = req.uri().path().to_string();

        if path.starts_with(METADATA_PATH) {
            let body = serde_json::to_string(&self.gate.metadata()).unwrap_or_default();
            return Box::pin(async move { Ok(json_response(StatusCode::OK, body)) });
        }

        let decision = self.gate.evaluate(GateRequest {
            path: &path,
            authorization: req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            tool_name: req.extensions().get::<ToolName>().map(|t| t.0.as_str()),
        });

        match decision {
            GateDecision::Challenge(challenge) => {
                let response = challenge_response(challenge);
                Box::pin(async move { Ok(response) })
            }
            GateDecision::Bypass => self.forward(req),
            GateDecision::Proceed { token, bearer } => {
                if let Some(token) = token {
                    req.extensions_mut().insert(token);
                }
                if let Some(bearer) = bearer {
                    req.extensions_mut().insert(InboundBearer(bearer));
                }
                self.forward(req)
            }
        }
    }
}

impl<S> GateService<S> {
    fn forward<B, ResBody>(
        &mut self,
        req: http::Request<B>,
    ) -> GateServiceFuture<http::Response<ResBody>, S::Error>
    where
        S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
        S::Future: Send,
        B: Send + 'static,
    {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
