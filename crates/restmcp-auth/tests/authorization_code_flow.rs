//! Authorization code + PKCE integration tests
//!
//! Covers the redirect round trip, session upgrade from the ID token,
//! production versus development callback messages and the interactive
//! login wait.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{MockAuthServer, STATE_SECRET, authorization_code_config, deps, mint_jwt, now};
use pretty_assertions::assert_eq;
use restmcp_auth::{
    AuthError, AuthProvider, AuthRequestContext, AuthorizationCodeProvider, LoginPrompt,
    MemoryTokenStore, SessionIdentityMap, SignedStateCodec, TokenData, TokenLookup, TokenStore,
};
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

struct Harness {
    server: MockAuthServer,
    provider: AuthorizationCodeProvider,
    store: Arc<MemoryTokenStore>,
    sessions: Arc<SessionIdentityMap>,
}

async fn harness() -> Harness {
    let server = MockAuthServer::start().await;
    let (deps, store, sessions) = deps();
    let codec = SignedStateCodec::new(SecretString::new(STATE_SECRET.into())).unwrap();
    let provider =
        AuthorizationCodeProvider::new(authorization_code_config(&server), deps, codec).unwrap();
    Harness {
        server,
        provider,
        store,
        sessions,
    }
}

async fn mock_code_exchange(server: &MockAuthServer, subject: &str) {
    let id_token = mint_jwt(json!({ "sub": subject, "iss": "https://auth.example.com", "exp": now() + 3600 }));
    server
        .mock_grant(
            "authorization_code",
            200,
            json!({
                "access_token": "user-token",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "user-refresh",
                "id_token": id_token,
            }),
        )
        .await;
}

fn query(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn callback(code: &str, state: &str) -> HashMap<String, String> {
    HashMap::from([
        ("code".to_string(), code.to_string()),
        ("state".to_string(), state.to_string()),
    ])
}

#[tokio::test]
async fn test_authorization_url_parameters() {
    let h = harness().await;
    let request = h
        .provider
        .build_authorization_url(&AuthRequestContext::new("h1"))
        .await
        .unwrap();

    let params = query(&request.url);
    assert!(request.url.starts_with(&h.server.authorize_endpoint));
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["client_id"], "web-client");
    assert_eq!(params["redirect_uri"], "http://localhost:8080/oauth/callback");
    assert_eq!(params["scope"], "repo");
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(params["code_challenge"].len(), 43);
    assert!(params["state"].contains('.'));

    // the verifier waits in the store until the callback consumes it
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_callback_upgrades_session_to_subject() {
    let h = harness().await;
    mock_code_exchange(&h.server, "u42").await;

    let request = h
        .provider
        .build_authorization_url(&AuthRequestContext::new("h1"))
        .await
        .unwrap();
    let state = query(&request.url)["state"].clone();

    let outcome = h
        .provider
        .handle_authorization_callback("code-abc", &state)
        .await
        .unwrap();

    assert!(outcome.upgraded);
    assert_eq!(outcome.session_key, "u42");
    assert_eq!(h.sessions.resolve("h1"), "u42");
    assert!(matches!(h.store.get("u42", "github").await, TokenLookup::Found(_)));
    assert_eq!(h.store.get("h1", "github").await, TokenLookup::Missing);
    // verifier consumed
    assert_eq!(h.store.len(), 1);

    let body = &h.server.token_bodies().await[0];
    assert!(body.contains("code=code-abc"));
    assert!(body.contains("code_verifier="));

    // later calls on the handle use the principal's token
    let mut outgoing = common::outgoing();
    h.provider
        .apply(&AuthRequestContext::new("h1"), &mut outgoing)
        .await
        .unwrap();
    assert_eq!(common::authorization(&outgoing).as_deref(), Some("Bearer user-token"));
}

#[tokio::test]
async fn test_upgrade_can_be_disabled() {
    let server = MockAuthServer::start().await;
    mock_code_exchange(&server, "u42").await;
    let (deps, store, sessions) = deps();
    let codec = SignedStateCodec::new(SecretString::new(STATE_SECRET.into())).unwrap();
    let provider = AuthorizationCodeProvider::new(authorization_code_config(&server), deps, codec)
        .unwrap()
        .with_session_upgrade(false);

    let request = provider
        .build_authorization_url(&AuthRequestContext::new("h1"))
        .await
        .unwrap();
    let state = query(&request.url)["state"].clone();
    let outcome = provider
        .handle_authorization_callback("code-abc", &state)
        .await
        .unwrap();

    assert!(!outcome.upgraded);
    assert_eq!(sessions.resolve("h1"), "h1");
    assert!(matches!(store.get("h1", "github").await, TokenLookup::Found(_)));
}

#[tokio::test]
async fn test_second_identity_cannot_take_over_principal() {
    let h = harness().await;
    h.sessions.upgrade("h1", "u42");
    h.store
        .save("u42", "github", TokenData::new("u42-token"))
        .await
        .unwrap();
    mock_code_exchange(&h.server, "u99").await;

    let request = h
        .provider
        .build_authorization_url(&AuthRequestContext::new("h1"))
        .await
        .unwrap();
    let state = query(&request.url)["state"].clone();
    let err = h
        .provider
        .handle_authorization_callback("code-abc", &state)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "invalid_state");
    assert_eq!(h.sessions.resolve("h1"), "u42");
    match h.store.get("u42", "github").await {
        TokenLookup::Found(token) => assert_eq!(token.access_token, "u42-token"),
        other => panic!("principal token lost: {:?}", other),
    }
    assert_eq!(h.store.get("u99", "github").await, TokenLookup::Missing);
    // only the principal's token is left; the verifier is gone
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_cancelled_provider_skips_code_exchange() {
    let server = MockAuthServer::start().await;
    mock_code_exchange(&server, "u42").await;
    let (deps, store, _) = deps();
    let codec = SignedStateCodec::new(SecretString::new(STATE_SECRET.into())).unwrap();
    let shutdown = CancellationToken::new();
    let provider = AuthorizationCodeProvider::new(authorization_code_config(&server), deps, codec)
        .unwrap()
        .with_cancellation(shutdown.clone());

    let request = provider
        .build_authorization_url(&AuthRequestContext::new("h1"))
        .await
        .unwrap();
    shutdown.cancel();

    let err = provider
        .handle_authorization_callback("code-abc", &query(&request.url)["state"])
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Cancelled));
    assert_eq!(server.token_calls().await, 0);
    assert_eq!(store.get("h1", "github").await, TokenLookup::Missing);
}

#[tokio::test]
async fn test_replayed_callback_is_rejected() {
    let h = harness().await;
    mock_code_exchange(&h.server, "u42").await;

    let request = h
        .provider
        .build_authorization_url(&AuthRequestContext::new("h1"))
        .await
        .unwrap();
    let state = query(&request.url)["state"].clone();
    h.provider
        .handle_authorization_callback("code-abc", &state)
        .await
        .unwrap();

    let err = h
        .provider
        .handle_authorization_callback("code-abc", &state)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "invalid_state");
    assert_eq!(h.server.token_calls().await, 1);
}

#[tokio::test]
async fn test_callback_messages_production_vs_development() {
    let h = harness().await;
    let tampered = callback("code-abc", "e30.bm90LWEtc2lnbmF0dXJl");

    let response = h.provider.handle_callback_query(&tampered).await;
    assert_eq!(response.status, 400);
    assert!(!response.success);
    assert_eq!(response.message, "Login failed. Please start the login again.");

    let server = MockAuthServer::start().await;
    let (deps, _, _) = deps();
    let codec = SignedStateCodec::new(SecretString::new(STATE_SECRET.into())).unwrap();
    let development = AuthorizationCodeProvider::new(authorization_code_config(&server), deps, codec)
        .unwrap()
        .with_production(false);

    let response = development.handle_callback_query(&tampered).await;
    assert_eq!(response.status, 400);
    assert!(response.message.starts_with("invalid_state"));
    assert!(response.message.contains("signature"));
    assert!(!response.message.contains(STATE_SECRET));

    let missing = development.handle_callback_query(&HashMap::new()).await;
    assert!(missing.message.contains("missing code or state"));
}

#[tokio::test]
async fn test_callback_success_response() {
    let h = harness().await;
    mock_code_exchange(&h.server, "u42").await;
    let request = h
        .provider
        .build_authorization_url(&AuthRequestContext::new("h1"))
        .await
        .unwrap();

    let response = h
        .provider
        .handle_callback_query(&callback("code-abc", &query(&request.url)["state"]))
        .await;
    assert_eq!(response.status, 200);
    assert!(response.success);
}

#[tokio::test]
async fn test_apply_without_token_requires_login() {
    let h = harness().await;
    let err = h
        .provider
        .apply(&AuthRequestContext::new("h1"), &mut common::outgoing())
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "login_required");
    assert!(err.to_string().contains("login"));
    assert_eq!(h.server.token_calls().await, 0);
}

/// Hands the authorization URL to the test body
struct ChannelPrompt {
    url: Mutex<Option<oneshot::Sender<String>>>,
}

impl ChannelPrompt {
    fn new() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                url: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl LoginPrompt for ChannelPrompt {
    async fn open(&self, authorization_url: &str) -> restmcp_auth::Result<()> {
        if let Some(tx) = self.url.lock().unwrap().take() {
            let _ = tx.send(authorization_url.to_string());
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_login_resolves_when_callback_arrives() {
    let h = harness().await;
    mock_code_exchange(&h.server, "u42").await;
    let (prompt, url_rx) = ChannelPrompt::new();
    let ctx = AuthRequestContext::new("h1");

    let browser = async {
        let url = url_rx.await.unwrap();
        let state = query(&url)["state"].clone();
        h.provider
            .handle_callback_query(&callback("code-abc", &state))
            .await
    };

    let (session, response) = tokio::join!(
        h.provider.login(&ctx, &prompt, Duration::from_secs(5)),
        browser
    );

    assert_eq!(session.unwrap(), "u42");
    assert!(response.success);
    assert_eq!(h.provider.pending_logins(), 0);
}

#[tokio::test]
async fn test_login_reports_callback_failure() {
    let h = harness().await;
    h.server
        .mock_token_error("authorization_code", "invalid_grant", "code already used")
        .await;
    let (prompt, url_rx) = ChannelPrompt::new();
    let ctx = AuthRequestContext::new("h1");

    let browser = async {
        let url = url_rx.await.unwrap();
        let state = query(&url)["state"].clone();
        h.provider
            .handle_callback_query(&callback("code-abc", &state))
            .await
    };

    let (result, response) = tokio::join!(
        h.provider.login(&ctx, &prompt, Duration::from_secs(5)),
        browser
    );

    assert_eq!(result.unwrap_err().error_code(), "upstream_error");
    assert_eq!(response.status, 502);
}

#[tokio::test]
async fn test_login_times_out() {
    let h = harness().await;
    let (prompt, _url_rx) = ChannelPrompt::new();

    let err = h
        .provider
        .login(&AuthRequestContext::new("h1"), &prompt, Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Timeout(_)));
    assert_eq!(h.provider.pending_logins(), 0);
    // verifier removed with the registration
    assert_eq!(h.store.len(), 0);
}

struct FailingPrompt;

#[async_trait]
impl LoginPrompt for FailingPrompt {
    async fn open(&self, _authorization_url: &str) -> restmcp_auth::Result<()> {
        Err(AuthError::Configuration("no browser available".into()))
    }
}

#[tokio::test]
async fn test_login_prompt_failure_cleans_up() {
    let h = harness().await;

    let err = h
        .provider
        .login(&AuthRequestContext::new("h1"), &FailingPrompt, Duration::from_secs(5))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "configuration_error");
    assert_eq!(h.provider.pending_logins(), 0);
    assert_eq!(h.store.len(), 0);
}

#[tokio::test]
async fn test_login_cancelled() {
    let h = harness().await;
    let (prompt, _url_rx) = ChannelPrompt::new();
    let cancel = CancellationToken::new();
    let ctx = AuthRequestContext::new("h1").with_cancellation(cancel.clone());

    let (result, ()) = tokio::join!(
        h.provider.login(&ctx, &prompt, Duration::from_secs(30)),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        }
    );

    assert!(matches!(result.unwrap_err(), AuthError::Cancelled));
    assert_eq!(h.provider.pending_logins(), 0);
    assert_eq!(h.store.len(), 0);
}
