//! Device authorization grant (RFC 8628) integration tests

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{MockAuthServer, authorization, deps, device_config, outgoing};
use restmcp_auth::oauth2::{DEVICE_CODE_GRANT, DeviceAuthorization};
use restmcp_auth::{
    AuthError, AuthProvider, AuthRequestContext, DeviceCodeProvider, DevicePrompt, TokenStore,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const DEVICE_GRANT_FORM: &str = "urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code";

#[derive(Default)]
struct RecordingPrompt {
    shown: Mutex<Vec<String>>,
}

#[async_trait]
impl DevicePrompt for RecordingPrompt {
    async fn show(&self, authorization: &DeviceAuthorization) -> restmcp_auth::Result<()> {
        self.shown
            .lock()
            .unwrap()
            .push(authorization.user_code.clone());
        Ok(())
    }
}

fn provider(server: &MockAuthServer) -> (DeviceCodeProvider, Arc<RecordingPrompt>) {
    let (deps, _, _) = deps();
    let prompt = Arc::new(RecordingPrompt::default());
    let provider = DeviceCodeProvider::new(device_config(server), deps, prompt.clone()).unwrap();
    (provider, prompt)
}

#[test]
fn test_grant_urn_form_encoding() {
    assert_eq!(
        url::form_urlencoded::byte_serialize(DEVICE_CODE_GRANT.as_bytes()).collect::<String>(),
        DEVICE_GRANT_FORM
    );
}

#[tokio::test]
async fn test_polls_until_authorized() {
    let server = MockAuthServer::start().await;
    server.mock_device_authorization("dev-123", 0).await;
    server
        .mock_device_poll_error("authorization_pending", 3)
        .await;
    server
        .mock_token_success(DEVICE_GRANT_FORM, "device-token", 3600)
        .await;

    let (provider, prompt) = provider(&server);
    let token = provider
        .perform_device_login(&AuthRequestContext::new("tv-1"))
        .await
        .unwrap();

    assert_eq!(token.access_token, "device-token");
    assert_eq!(server.token_calls().await, 4);
    assert_eq!(*prompt.shown.lock().unwrap(), vec!["WDJB-MJHT".to_string()]);
    assert!(
        server
            .token_bodies()
            .await
            .iter()
            .all(|body| body.contains("device_code=dev-123"))
    );
}

#[tokio::test]
async fn test_apply_persists_device_token() {
    let server = MockAuthServer::start().await;
    server.mock_device_authorization("dev-123", 0).await;
    server
        .mock_token_success(DEVICE_GRANT_FORM, "device-token", 3600)
        .await;

    let (deps, store, _) = deps();
    let provider =
        DeviceCodeProvider::new(device_config(&server), deps, Arc::new(RecordingPrompt::default()))
            .unwrap();

    let mut request = outgoing();
    provider
        .apply(&AuthRequestContext::new("tv-1"), &mut request)
        .await
        .unwrap();
    assert_eq!(authorization(&request).as_deref(), Some("Bearer device-token"));
    assert!(store.get("tv-1", "tv").await.into_option().is_some());

    // second call is served from the store
    provider
        .apply(&AuthRequestContext::new("tv-1"), &mut outgoing())
        .await
        .unwrap();
    assert_eq!(server.token_calls().await, 1);
}

#[tokio::test]
async fn test_expired_token_ends_polling() {
    let server = MockAuthServer::start().await;
    server.mock_device_authorization("dev-123", 0).await;
    server.mock_device_poll_error("expired_token", 1).await;

    let (provider, _) = provider(&server);
    let err = provider
        .perform_device_login(&AuthRequestContext::new("tv-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::ExpiredCode));
    assert_eq!(err.error_code(), "expired_code");
}

#[tokio::test]
async fn test_access_denied_is_upstream_error() {
    let server = MockAuthServer::start().await;
    server.mock_device_authorization("dev-123", 0).await;
    server.mock_device_poll_error("access_denied", 1).await;

    let (provider, _) = provider(&server);
    let err = provider
        .perform_device_login(&AuthRequestContext::new("tv-1"))
        .await
        .unwrap_err();

    match err {
        AuthError::Upstream { error, .. } => assert_eq!(error.as_deref(), Some("access_denied")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_code_lifetime_elapses_while_pending() {
    let server = MockAuthServer::start().await;
    server.mock_device_codes("dev-123", 1, 2).await;
    server
        .mock_device_poll_error("authorization_pending", 1000)
        .await;

    let (provider, _) = provider(&server);
    let err = provider
        .perform_device_login(&AuthRequestContext::new("tv-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::ExpiredCode));
    // polled once at 1s; the 2s wake is past the code lifetime
    assert_eq!(server.token_calls().await, 1);
}

#[tokio::test]
async fn test_unbounded_code_lifetime() {
    let server = MockAuthServer::start().await;
    server.mock_device_codes("dev-123", 0, u64::MAX).await;
    server
        .mock_token_success(DEVICE_GRANT_FORM, "device-token", u64::MAX)
        .await;

    let (provider, _) = provider(&server);
    let token = provider
        .perform_device_login(&AuthRequestContext::new("tv-1"))
        .await
        .unwrap();

    assert_eq!(token.access_token, "device-token");
    assert!(token.is_usable());
}

#[tokio::test]
async fn test_cancellation_stops_polling() {
    let server = MockAuthServer::start().await;
    server.mock_device_authorization("dev-123", 1).await;
    server
        .mock_device_poll_error("authorization_pending", 1000)
        .await;

    let (provider, _) = provider(&server);
    let cancel = CancellationToken::new();
    let ctx = AuthRequestContext::new("tv-1").with_cancellation(cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), provider.perform_device_login(&ctx))
        .await
        .expect("cancellation should end the poll loop")
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, AuthError::Cancelled));
    assert!(server.token_calls().await >= 1);
}

#[tokio::test]
async fn test_device_endpoint_rejection() {
    let server = MockAuthServer::start().await;
    wiremock::Mock::given(wiremock::matchers::path("/device"))
        .respond_with(
            wiremock::ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_client" })),
        )
        .mount(&server.server)
        .await;

    let (provider, prompt) = provider(&server);
    let err = provider
        .perform_device_login(&AuthRequestContext::new("tv-1"))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "upstream_error");
    assert!(prompt.shown.lock().unwrap().is_empty());
    assert_eq!(server.token_calls().await, 0);
}
