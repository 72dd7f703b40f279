//! OAuth discovery integration tests using wiremock
//!
//! Verifies the behaviour of `src/auth/discovery.rs`:
//!
//! - A Bearer challenge with `resource_metadata` fetches and validates the
//!   protected resource metadata, and its first authorization server wins.
//! - A resource mismatch or unreachable metadata document fails discovery.
//! - Authorization server metadata is tried at each well-known URL in order
//!   and synthesized from defaults when none answers.

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcp_dynamic_auth::auth::discovery::{
    discover, fetch_authorization_server_metadata, fetch_protected_resource_metadata,
};
use mcp_dynamic_auth::error::AuthError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn authorization_server_body(issuer: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/oauth/authorize", issuer),
        "token_endpoint": format!("{}/oauth/token", issuer),
        "registration_endpoint": format!("{}/oauth/register", issuer),
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"]
    })
}

fn challenge(prm_url: &str) -> String {
    format!(r#"Bearer realm="mcp", resource_metadata="{}""#, prm_url)
}

// ---------------------------------------------------------------------------
// fetch_protected_resource_metadata
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_protected_resource_metadata_matching_resource() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": format!("{}/mcp", base),
            "authorization_servers": ["https://auth.example.com"],
            "scopes_supported": ["read", "write"]
        })))
        .mount(&server)
        .await;

    let meta = fetch_protected_resource_metadata(
        &reqwest::Client::new(),
        &format!("{}/.well-known/oauth-protected-resource/mcp", base),
    )
    .await
    .unwrap();

    assert_eq!(
        meta.authorization_servers,
        Some(vec!["https://auth.example.com".to_string()])
    );
    assert_eq!(
        meta.scopes_supported,
        Some(vec!["read".to_string(), "write".to_string()])
    );
}

#[tokio::test]
async fn test_protected_resource_metadata_resource_mismatch_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": "https://elsewhere.example.com/mcp"
        })))
        .mount(&server)
        .await;

    let err = fetch_protected_resource_metadata(
        &reqwest::Client::new(),
        &format!("{}/.well-known/oauth-protected-resource/mcp", server.uri()),
    )
    .await
    .unwrap_err();

    match err.downcast_ref::<AuthError>() {
        Some(AuthError::Discovery(msg)) => assert!(msg.contains("does not match"), "{msg}"),
        other => panic!("expected Discovery error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_protected_resource_metadata_non_200_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = fetch_protected_resource_metadata(
        &reqwest::Client::new(),
        &format!("{}/.well-known/oauth-protected-resource", server.uri()),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_protected_resource_metadata_root_resource() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": server.uri()
        })))
        .mount(&server)
        .await;

    let result = fetch_protected_resource_metadata(
        &reqwest::Client::new(),
        &format!("{}/.well-known/oauth-protected-resource", server.uri()),
    )
    .await;
    assert!(result.is_ok(), "{result:?}");
}

// ---------------------------------------------------------------------------
// fetch_authorization_server_metadata
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_authorization_server_metadata_falls_through_candidates() {
    let server = MockServer::start().await;
    let issuer = format!("{}/tenant", server.uri());

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server/tenant"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration/tenant"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tenant/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(authorization_server_body(&issuer)))
        .expect(1)
        .mount(&server)
        .await;

    let meta =
        fetch_authorization_server_metadata(&reqwest::Client::new(), &Url::parse(&issuer).unwrap())
            .await
            .unwrap();
    assert_eq!(meta.issuer, issuer);
    assert_eq!(
        meta.token_endpoint,
        Some(format!("{}/oauth/token", issuer))
    );
}

#[tokio::test]
async fn test_authorization_server_metadata_first_success_wins() {
    let server = MockServer::start().await;
    let issuer = server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(authorization_server_body(&issuer)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(authorization_server_body(&issuer)))
        .expect(0)
        .mount(&server)
        .await;

    let meta =
        fetch_authorization_server_metadata(&reqwest::Client::new(), &Url::parse(&issuer).unwrap())
            .await
            .unwrap();
    assert_eq!(meta.issuer, issuer);
}

#[tokio::test]
async fn test_authorization_server_metadata_invalid_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_endpoint": "https://x/token"
        })))
        .mount(&server)
        .await;

    let err = fetch_authorization_server_metadata(
        &reqwest::Client::new(),
        &Url::parse(&server.uri()).unwrap(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::InvalidServerResponse(_))
    ));
}

#[tokio::test]
async fn test_authorization_server_metadata_none_found() {
    let server = MockServer::start().await;

    let err = fetch_authorization_server_metadata(
        &reqwest::Client::new(),
        &Url::parse(&server.uri()).unwrap(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::Discovery(_))
    ));
}

// ---------------------------------------------------------------------------
// discover
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_discover_uses_first_advertised_authorization_server() {
    let resource = MockServer::start().await;
    let auth = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": format!("{}/mcp", resource.uri()),
            "authorization_servers": [auth.uri(), "https://unused.example.com"]
        })))
        .mount(&resource)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(authorization_server_body(&auth.uri())),
        )
        .mount(&auth)
        .await;

    let request_url = Url::parse(&format!("{}/mcp", resource.uri())).unwrap();
    let header = challenge(&format!(
        "{}/.well-known/oauth-protected-resource/mcp",
        resource.uri()
    ));
    let meta = discover(&reqwest::Client::new(), &request_url, Some(&header))
        .await
        .unwrap();

    assert_eq!(
        meta.authorization_server.origin(),
        Url::parse(&auth.uri()).unwrap().origin()
    );
    assert_eq!(meta.server_metadata.issuer, auth.uri());
    assert!(meta.resource_metadata.is_some());
}

#[tokio::test]
async fn test_discover_falls_back_to_default_metadata() {
    let resource = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": resource.uri(),
            "scopes_supported": ["files:read"]
        })))
        .mount(&resource)
        .await;

    let request_url = Url::parse(&format!("{}/mcp", resource.uri())).unwrap();
    let header = challenge(&format!(
        "{}/.well-known/oauth-protected-resource",
        resource.uri()
    ));
    let meta = discover(&reqwest::Client::new(), &request_url, Some(&header))
        .await
        .unwrap();

    assert_eq!(
        meta.server_metadata.authorization_endpoint,
        Some(format!("{}/authorize", resource.uri()))
    );
    assert_eq!(
        meta.server_metadata.registration_endpoint,
        Some(format!("{}/register", resource.uri()))
    );
    assert_eq!(
        meta.server_metadata.scopes_supported,
        Some(vec!["files:read".to_string()])
    );
}

#[tokio::test]
async fn test_discover_fails_when_advertised_metadata_is_missing() {
    let resource = MockServer::start().await;
    let request_url = Url::parse(&format!("{}/mcp", resource.uri())).unwrap();
    let header = challenge(&format!(
        "{}/.well-known/oauth-protected-resource/mcp",
        resource.uri()
    ));

    let err = discover(&reqwest::Client::new(), &request_url, Some(&header))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AuthError>(),
        Some(AuthError::Discovery(_))
    ));
}

#[tokio::test]
async fn test_discover_ignores_non_bearer_challenge() {
    let resource = MockServer::start().await;
    let request_url = Url::parse(&format!("{}/mcp", resource.uri())).unwrap();

    let meta = discover(
        &reqwest::Client::new(),
        &request_url,
        Some(r#"Basic realm="x", resource_metadata="https://nowhere.invalid/""#),
    )
    .await
    .unwrap();
    assert!(meta.resource_metadata.is_none());
    assert_eq!(
        meta.server_metadata.token_endpoint,
        Some(format!("{}/token", resource.uri()))
    );
}
