//! Common test utilities for integration tests
//!
//! A wiremock authorization server plus helpers to build providers and mint
//! test JWTs.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use restmcp_auth::{
    GrantType, MemoryTokenStore, OAuthProviderConfig, ProviderDeps, SessionIdentityMap,
    TokenEndpointClient,
};
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// 32-byte state secret
pub const STATE_SECRET: &str = "integration-test-state-secret-0123456789";

/// Mock OAuth 2.0 authorization server
pub struct MockAuthServer {
    pub server: MockServer,
    pub token_endpoint: String,
    pub authorize_endpoint: String,
    pub device_endpoint: String,
}

impl MockAuthServer {
    /// Start a new mock authorization server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();

        Self {
            token_endpoint: format!("{}/token", base_url),
            authorize_endpoint: format!("{}/authorize", base_url),
            device_endpoint: format!("{}/device", base_url),
            server,
        }
    }

    /// Token endpoint answers `grant` with `body`
    pub async fn mock_grant(&self, grant: &str, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(format!("grant_type={}", grant)))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Successful token response for `grant`
    pub async fn mock_token_success(&self, grant: &str, access_token: &str, expires_in: u64) {
        self.mock_grant(
            grant,
            200,
            json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": expires_in,
            }),
        )
        .await;
    }

    /// OAuth error response for `grant`
    pub async fn mock_token_error(&self, grant: &str, error: &str, description: &str) {
        self.mock_grant(
            grant,
            400,
            json!({ "error": error, "error_description": description }),
        )
        .await;
    }

    /// Device authorization endpoint issuing `device_code`
    pub async fn mock_device_authorization(&self, device_code: &str, interval: u64) {
        self.mock_device_codes(device_code, interval, 600).await;
    }

    /// Device endpoint issuing codes valid for `expires_in` seconds
    pub async fn mock_device_codes(&self, device_code: &str, interval: u64, expires_in: u64) {
        Mock::given(method("POST"))
            .and(path("/device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": device_code,
                "user_code": "WDJB-MJHT",
                "verification_uri": format!("{}/activate", self.server.uri()),
                "expires_in": expires_in,
                "interval": interval,
            })))
            .mount(&self.server)
            .await;
    }

    /// Device polls answer `error` for the first `times` calls
    pub async fn mock_device_poll_error(&self, error: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("device_code"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": error })))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Number of requests the token endpoint received
    pub async fn token_calls(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/token")
            .count()
    }

    /// Form bodies the token endpoint received
    pub async fn token_bodies(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/token")
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }
}

/// Collaborators over an in-memory store
pub fn deps() -> (ProviderDeps, Arc<MemoryTokenStore>, Arc<SessionIdentityMap>) {
    let store = Arc::new(MemoryTokenStore::new());
    let sessions = Arc::new(SessionIdentityMap::new());
    let deps = ProviderDeps::new(
        store.clone(),
        sessions.clone(),
        TokenEndpointClient::new().expect("http client"),
    );
    (deps, store, sessions)
}

pub fn client_credentials_config(server: &MockAuthServer) -> OAuthProviderConfig {
    OAuthProviderConfig::new(
        "billing",
        GrantType::ClientCredentials,
        "svc-client",
        &server.token_endpoint,
    )
    .with_client_secret("svc-secret")
    .with_scope("invoices.read", "Read invoices")
}

pub fn device_config(server: &MockAuthServer) -> OAuthProviderConfig {
    OAuthProviderConfig::new("tv", GrantType::DeviceCode, "tv-client", &server.token_endpoint)
        .with_device_authorization_endpoint(&server.device_endpoint)
}

pub fn authorization_code_config(server: &MockAuthServer) -> OAuthProviderConfig {
    OAuthProviderConfig::new(
        "github",
        GrantType::AuthorizationCode,
        "web-client",
        &server.token_endpoint,
    )
    .with_authorization_endpoint(&server.authorize_endpoint)
    .with_redirect_uri("http://localhost:8080/oauth/callback")
    .with_scope("repo", "Repository access")
}

/// HS256 JWT with `claims`; signatures are never checked by the crate
pub fn mint_jwt(claims: Value) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-signing-key"),
    )
    .expect("Failed to encode test JWT")
}

/// Current Unix timestamp
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Outgoing request to decorate
pub fn outgoing() -> reqwest::Request {
    reqwest::Request::new(
        reqwest::Method::GET,
        "https://api.example.com/v1/items".parse().expect("static url"),
    )
}

/// `Authorization` header of a decorated request
pub fn authorization(request: &reqwest::Request) -> Option<String> {
    request
        .headers()
        .get(reqwest::header::AUTHORIZATION)
        .map(|v| v.to_str().expect("ascii header").to_string())
}
