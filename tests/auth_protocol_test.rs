//! Dynamic client registration and token endpoint tests using wiremock
//!
//! Verifies the behaviour of `src/auth/protocol.rs`:
//!
//! - `fetch_dynamic_registration` sends the native-client body, an empty
//!   `scope` for an empty scope list and no `scope` at all when unknown.
//! - Registration errors surface the server's `error: error_description`.
//! - `post_token_request` maps `invalid_client` to its own error.

mod common;

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcp_dynamic_auth::auth::protocol::{fetch_dynamic_registration, post_token_request};
use mcp_dynamic_auth::config::AuthConfig;
use mcp_dynamic_auth::error::AuthError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn registration_body(server: &MockServer) -> serde_json::Value {
    let requests = server.received_requests().await.unwrap();
    let request = requests
        .iter()
        .find(|r| r.url.path() == "/register")
        .expect("registration request");
    serde_json::from_slice(&request.body).unwrap()
}

async fn mount_registration_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "client_id": "dyn-client",
            "client_id_issued_at": 1700000000
        })))
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// fetch_dynamic_registration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_registration_sends_native_client_body() {
    let server = MockServer::start().await;
    mount_registration_ok(&server).await;

    let meta = common::server_metadata(&server.uri());
    let config = AuthConfig::default();
    let client = fetch_dynamic_registration(&reqwest::Client::new(), &meta, &config, None)
        .await
        .unwrap();

    assert_eq!(client.client_id, "dyn-client");
    assert!(client.client_secret.is_none());

    let body = registration_body(&server).await;
    assert_eq!(body["client_name"], config.client_name.as_str());
    assert_eq!(body["token_endpoint_auth_method"], "none");
    assert_eq!(body["application_type"], "native");
    assert_eq!(body["response_types"], serde_json::json!(["code"]));
    assert!(body.get("scope").is_none());

    let redirects: Vec<String> = serde_json::from_value(body["redirect_uris"].clone()).unwrap();
    assert!(redirects.contains(&"http://127.0.0.1:33418/".to_string()));
    assert!(redirects.contains(&"http://localhost/".to_string()));

    let grants: Vec<String> = serde_json::from_value(body["grant_types"].clone()).unwrap();
    assert_eq!(
        grants,
        vec![
            "authorization_code",
            "refresh_token",
            "urn:ietf:params:oauth:grant-type:device_code"
        ]
    );
}

#[tokio::test]
async fn test_registration_with_empty_scopes_sends_empty_string() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .and(body_partial_json(serde_json::json!({ "scope": "" })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({ "client_id": "c" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let meta = common::server_metadata(&server.uri());
    let result = fetch_dynamic_registration(
        &reqwest::Client::new(),
        &meta,
        &AuthConfig::default(),
        Some(&[]),
    )
    .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_registration_joins_scopes() {
    let server = MockServer::start().await;
    mount_registration_ok(&server).await;

    let meta = common::server_metadata(&server.uri());
    let scopes = vec!["read".to_string(), "write".to_string()];
    fetch_dynamic_registration(
        &reqwest::Client::new(),
        &meta,
        &AuthConfig::default(),
        Some(&scopes),
    )
    .await
    .unwrap();

    assert_eq!(registration_body(&server).await["scope"], "read write");
}

#[tokio::test]
async fn test_registration_filters_advertised_grant_types() {
    let server = MockServer::start().await;
    mount_registration_ok(&server).await;

    let mut meta = common::server_metadata(&server.uri());
    meta.grant_types_supported = Some(vec![
        "authorization_code".to_string(),
        "implicit".to_string(),
        "refresh_token".to_string(),
    ]);
    fetch_dynamic_registration(&reqwest::Client::new(), &meta, &AuthConfig::default(), None)
        .await
        .unwrap();

    assert_eq!(
        registration_body(&server).await["grant_types"],
        serde_json::json!(["authorization_code", "refresh_token"])
    );
}

#[tokio::test]
async fn test_registration_error_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_redirect_uri",
            "error_description": "loopback not allowed"
        })))
        .mount(&server)
        .await;

    let meta = common::server_metadata(&server.uri());
    let err = fetch_dynamic_registration(&reqwest::Client::new(), &meta, &AuthConfig::default(), None)
        .await
        .unwrap_err();

    match err.downcast_ref::<AuthError>() {
        Some(AuthError::RegistrationFailed(msg)) => {
            assert!(msg.contains("invalid_redirect_uri: loopback not allowed"), "{msg}");
        }
        other => panic!("expected RegistrationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_registration_non_json_error_keeps_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let meta = common::server_metadata(&server.uri());
    let err = fetch_dynamic_registration(&reqwest::Client::new(), &meta, &AuthConfig::default(), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("upstream exploded"));
}

#[tokio::test]
async fn test_registration_without_client_id_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "ok": true })))
        .mount(&server)
        .await;

    let meta = common::server_metadata(&server.uri());
    let err = fetch_dynamic_registration(&reqwest::Client::new(), &meta, &AuthConfig::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::InvalidServerResponse(_))
    ));
}

#[tokio::test]
async fn test_registration_without_endpoint_is_unsupported() {
    let mut meta = common::server_metadata("https://auth.example.com");
    meta.registration_endpoint = None;

    let err = fetch_dynamic_registration(&reqwest::Client::new(), &meta, &AuthConfig::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::UnsupportedByServer(_))
    ));
}

// ---------------------------------------------------------------------------
// post_token_request
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_token_request_invalid_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "invalid_client"
        })))
        .mount(&server)
        .await;

    let err = post_token_request(
        &reqwest::Client::new(),
        &format!("{}/token", server.uri()),
        &[("grant_type", "refresh_token"), ("refresh_token", "r")],
    )
    .await
    .unwrap_err();
    assert!(AuthError::is_invalid_client(&err));
}

#[tokio::test]
async fn test_token_request_other_oauth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .mount(&server)
        .await;

    let err = post_token_request(
        &reqwest::Client::new(),
        &format!("{}/token", server.uri()),
        &[("grant_type", "refresh_token")],
    )
    .await
    .unwrap_err();
    assert!(!AuthError::is_invalid_client(&err));
    match err.downcast_ref::<AuthError>() {
        Some(AuthError::OAuth { error, description }) => {
            assert_eq!(error, "invalid_grant");
            assert_eq!(description.as_deref(), Some("refresh token revoked"));
        }
        other => panic!("expected OAuth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_request_parses_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt"
        })))
        .mount(&server)
        .await;

    let token = post_token_request(
        &reqwest::Client::new(),
        &format!("{}/token", server.uri()),
        &[("grant_type", "refresh_token")],
    )
    .await
    .unwrap();
    assert_eq!(token.access_token, "at");
    assert_eq!(token.expires_in, Some(3600));
    assert_eq!(token.refresh_token.as_deref(), Some("rt"));
}
