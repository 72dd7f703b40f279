//! OAuth 2.0 protocol types and helpers for dynamic authentication
//!
//! This module contains the wire types and the stateless helpers the rest of
//! the crate builds on:
//!
//! - RFC 8414 authorization server metadata and RFC 9728 protected resource
//!   metadata, with shape guards for untrusted JSON
//! - `WWW-Authenticate` challenge parsing
//! - JWT claim extraction (no signature verification; claims are only used
//!   for display)
//! - RFC 7591 Dynamic Client Registration
//! - Token endpoint POSTs with structured OAuth error mapping
//!
//! # References
//!
//! - RFC 6749 <https://www.rfc-editor.org/rfc/rfc6749>
//! - RFC 7591 <https://www.rfc-editor.org/rfc/rfc7591>
//! - RFC 8414 <https://www.rfc-editor.org/rfc/rfc8414>
//! - RFC 8628 <https://www.rfc-editor.org/rfc/rfc8628>
//! - RFC 9728 <https://www.rfc-editor.org/rfc/rfc9728>

use std::collections::HashMap;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

/// RFC 9728 well-known path for protected resource metadata.
pub const AUTH_PROTECTED_RESOURCE_METADATA_DISCOVERY_PATH: &str =
    "/.well-known/oauth-protected-resource";

/// RFC 8414 well-known path for authorization server metadata.
pub const AUTH_SERVER_METADATA_DISCOVERY_PATH: &str = "/.well-known/oauth-authorization-server";

/// OpenID Connect Discovery 1.0 well-known path.
pub const OPENID_CONNECT_DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Grant type for the authorization code flow.
pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";

/// Grant type for refresh token exchange.
pub const GRANT_TYPE_REFRESH_TOKEN: &str = "refresh_token";

/// Grant type for RFC 8628 device code polling.
pub const GRANT_TYPE_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Grant types this client can drive.
pub const SUPPORTED_GRANT_TYPES: [&str; 3] = [
    GRANT_TYPE_AUTHORIZATION_CODE,
    GRANT_TYPE_REFRESH_TOKEN,
    GRANT_TYPE_DEVICE_CODE,
];

// Accepts JWT segments with or without trailing padding.
const JWT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ---------------------------------------------------------------------------
// Metadata documents
// ---------------------------------------------------------------------------

/// Metadata document describing an OAuth 2.0 / OIDC authorization server.
///
/// Only `issuer` is required: servers in the wild omit almost everything
/// else, and the flows check for the endpoints they need at run time.
///
/// # Examples
///
/// ```
/// use mcp_dynamic_auth::auth::protocol::AuthorizationServerMetadata;
///
/// let json = r#"{
///     "issuer": "https://auth.example.com",
///     "authorization_endpoint": "https://auth.example.com/authorize",
///     "token_endpoint": "https://auth.example.com/token",
///     "response_types_supported": ["code"]
/// }"#;
///
/// let meta: AuthorizationServerMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.issuer, "https://auth.example.com");
/// assert!(meta.device_authorization_endpoint.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier URI for this authorization server.
    pub issuer: String,

    /// The URL of the authorization endpoint (RFC 6749 section 3.1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// The URL of the token endpoint (RFC 6749 section 3.2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// URL of the Dynamic Client Registration endpoint (RFC 7591).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// URL of the device authorization endpoint (RFC 8628).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_authorization_endpoint: Option<String>,

    /// OAuth scopes the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// `grant_type` values the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// `response_type` values the server supports.
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// PKCE challenge methods the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Additional server metadata fields not explicitly modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Metadata document describing a protected resource (RFC 9728).
///
/// # Examples
///
/// ```
/// use mcp_dynamic_auth::auth::protocol::ProtectedResourceMetadata;
///
/// let json = r#"{"resource": "https://api.example.com/mcp"}"#;
/// let meta: ProtectedResourceMetadata = serde_json::from_str(json).unwrap();
/// assert!(meta.authorization_servers.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The URI of the protected resource itself.
    pub resource: String,

    /// Authorization server issuer URIs that protect this resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_servers: Option<Vec<String>>,

    /// OAuth scopes supported by this resource, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported methods for presenting bearer tokens (e.g. `"header"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
}

/// Client credentials returned by Dynamic Client Registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    /// The issued client identifier.
    pub client_id: String,

    /// The issued client secret, for confidential clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Raw JSON response from an OAuth token endpoint.
///
/// Converted into a stored [`Token`](super::token_store::Token) by stamping
/// the receipt time with [`into_token`](Self::into_token).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token string.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// Refresh token for obtaining new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Lifetime of the access token in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Space-separated granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// OpenID Connect ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Device authorization response (RFC 8628 section 3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAuthorizationResponse {
    /// Code the client polls the token endpoint with.
    pub device_code: String,

    /// Code the user enters at the verification URI.
    pub user_code: String,

    /// Where the user enters the code.
    pub verification_uri: String,

    /// Verification URI with the user code embedded, if offered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,

    /// Lifetime of the device and user codes in seconds.
    pub expires_in: u64,

    /// Minimum seconds between polls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

/// Structured OAuth error body (RFC 6749 section 5.2, RFC 7591 section 3.2.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    /// The error code.
    pub error: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// Link to a page describing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl TokenResponse {
    /// Converts the raw response into a stored token received at
    /// `created_at` (wall-clock milliseconds).
    pub fn into_token(self, created_at: i64) -> super::token_store::Token {
        super::token_store::Token {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            scope: self.scope,
            id_token: self.id_token,
            created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Shape guards
// ---------------------------------------------------------------------------

/// Deserializes `value` into `T`, reporting a shape mismatch as
/// [`AuthError::InvalidServerResponse`].
pub fn parse_guarded<T: DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T> {
    let snapshot = value.to_string();
    serde_json::from_value(value).map_err(|e| {
        AuthError::InvalidServerResponse(format!("invalid {what}: {e}: {snapshot}")).into()
    })
}

fn has_fields(value: &serde_json::Value, fields: &[&str]) -> bool {
    value
        .as_object()
        .map(|obj| fields.iter().all(|f| obj.get(*f).is_some_and(|v| !v.is_null())))
        .unwrap_or(false)
}

/// Returns `true` when `value` looks like authorization server metadata.
pub fn is_authorization_server_metadata(value: &serde_json::Value) -> bool {
    has_fields(value, &["issuer"])
}

/// Returns `true` when `value` looks like protected resource metadata.
pub fn is_protected_resource_metadata(value: &serde_json::Value) -> bool {
    has_fields(value, &["resource"])
}

/// Returns `true` when `value` looks like a successful registration response.
pub fn is_registration_response(value: &serde_json::Value) -> bool {
    has_fields(value, &["client_id"])
}

/// Returns `true` when `value` looks like a token response.
pub fn is_token_response(value: &serde_json::Value) -> bool {
    has_fields(value, &["access_token", "token_type"])
}

/// Returns `true` when `value` looks like a device authorization response.
pub fn is_device_authorization_response(value: &serde_json::Value) -> bool {
    has_fields(
        value,
        &["device_code", "user_code", "verification_uri", "expires_in"],
    )
}

/// Returns `true` when `value` looks like an OAuth error body.
pub fn is_oauth_error_response(value: &serde_json::Value) -> bool {
    has_fields(value, &["error"])
}

// ---------------------------------------------------------------------------
// WWW-Authenticate
// ---------------------------------------------------------------------------

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WwwAuthenticate {
    /// Authentication scheme, e.g. `Bearer`.
    pub scheme: String,
    /// Challenge parameters with surrounding quotes removed.
    pub params: HashMap<String, String>,
}

/// Parses a `WWW-Authenticate` header value.
///
/// The scheme is everything before the first space; the rest is split on
/// commas into `key=value` pairs. Parsing is best-effort: the scheme is not
/// validated and malformed pairs become keys with empty values.
///
/// # Examples
///
/// ```
/// use mcp_dynamic_auth::auth::protocol::parse_www_authenticate_header;
///
/// let parsed = parse_www_authenticate_header(r#"Bearer realm="mcp", scope="read""#);
/// assert_eq!(parsed.scheme, "Bearer");
/// assert_eq!(parsed.params["realm"], "mcp");
/// assert_eq!(parsed.params["scope"], "read");
/// ```
pub fn parse_www_authenticate_header(value: &str) -> WwwAuthenticate {
    let (scheme, rest) = value.split_once(' ').unwrap_or((value, ""));
    let mut params = HashMap::new();

    for attribute in rest.split(',') {
        if attribute.trim().is_empty() {
            continue;
        }
        let (key, val) = attribute.split_once('=').unwrap_or((attribute, ""));
        let key = key.trim().replace('"', "");
        let val = val.trim().replace('"', "");
        params.insert(key, val);
    }

    WwwAuthenticate {
        scheme: scheme.to_string(),
        params,
    }
}

// ---------------------------------------------------------------------------
// JWT claims
// ---------------------------------------------------------------------------

/// Decodes the payload claims of a JWT without verifying its signature.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] when the token does not have
/// exactly three segments, or when the header or payload is not a
/// base64url-encoded JSON object.
pub fn get_claims_from_jwt(token: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::MalformedToken(format!(
            "expected 3 segments, found {}",
            parts.len()
        ))
        .into());
    }

    decode_jwt_object(parts[0], "header")?;
    decode_jwt_object(parts[1], "payload")
}

fn decode_jwt_object(
    segment: &str,
    name: &str,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let bytes = JWT_ENGINE
        .decode(segment)
        .map_err(|e| AuthError::MalformedToken(format!("{name} is not base64url: {e}")))?;
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(AuthError::MalformedToken(format!("{name} is not a JSON object")).into()),
        Err(e) => Err(AuthError::MalformedToken(format!("{name} is not JSON: {e}")).into()),
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// Synthesizes authorization server metadata for servers that publish no
/// discovery document, using the conventional `/authorize`, `/token` and
/// `/register` endpoints at the server origin.
pub fn get_default_metadata_for_url(authorization_server: &Url) -> AuthorizationServerMetadata {
    let endpoint = |path: &str| {
        authorization_server
            .join(path)
            .map(|u| u.to_string())
            .ok()
    };

    AuthorizationServerMetadata {
        issuer: authorization_server.to_string(),
        authorization_endpoint: endpoint("/authorize"),
        token_endpoint: endpoint("/token"),
        registration_endpoint: endpoint("/register"),
        response_types_supported: vec![
            "code".to_string(),
            "id_token".to_string(),
            "id_token token".to_string(),
        ],
        ..AuthorizationServerMetadata::default()
    }
}

/// Derives the resource identifier a protected resource metadata URL was
/// published for, by removing the RFC 9728 well-known prefix from its path.
///
/// # Errors
///
/// Returns [`AuthError::Discovery`] if the URL cannot be parsed or its path
/// does not start with `/.well-known/oauth-protected-resource`.
///
/// # Examples
///
/// ```
/// use mcp_dynamic_auth::auth::protocol::get_resource_server_base_url_from_discovery_url;
///
/// let base = get_resource_server_base_url_from_discovery_url(
///     "https://h/.well-known/oauth-protected-resource/mcp",
/// )
/// .unwrap();
/// assert_eq!(base, "https://h/mcp");
/// ```
pub fn get_resource_server_base_url_from_discovery_url(discovery_url: &str) -> Result<String> {
    let url = Url::parse(discovery_url)
        .map_err(|e| AuthError::Discovery(format!("invalid discovery URL {discovery_url}: {e}")))?;

    let remainder = url
        .path()
        .strip_prefix(AUTH_PROTECTED_RESOURCE_METADATA_DISCOVERY_PATH)
        .ok_or_else(|| {
            AuthError::Discovery(format!(
                "{discovery_url} is not a protected resource metadata URL"
            ))
        })?;

    let mut base = Url::parse(&url.origin().ascii_serialization())
        .map_err(|e| AuthError::Discovery(format!("invalid origin for {discovery_url}: {e}")))?;
    base.set_path(if remainder.is_empty() { "/" } else { remainder });
    Ok(base.to_string())
}

// ---------------------------------------------------------------------------
// Dynamic Client Registration (RFC 7591)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    client_name: &'a str,
    client_uri: &'a str,
    grant_types: Vec<String>,
    response_types: [&'static str; 1],
    redirect_uris: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    token_endpoint_auth_method: &'static str,
    application_type: &'static str,
}

/// Redirect URIs registered for this native client.
///
/// Both `localhost` and `127.0.0.1` are listed with and without the fixed
/// loopback port, for servers that match redirect URIs exactly.
pub fn native_redirect_uris(config: &AuthConfig) -> Vec<String> {
    let mut uris = config.redirect_uris.clone();
    if let Some(redirect) = &config.url_handler_redirect_uri {
        if !uris.contains(redirect) {
            uris.push(redirect.clone());
        }
    }
    uris.extend([
        "http://localhost/".to_string(),
        "http://127.0.0.1/".to_string(),
        format!("http://localhost:{}/", config.loopback_port),
        format!("http://127.0.0.1:{}/", config.loopback_port),
    ]);
    uris
}

/// Builds the grant types to request: the server-advertised types this
/// client supports, or every supported type when the server is silent.
fn registration_grant_types(server_metadata: &AuthorizationServerMetadata) -> Vec<String> {
    match &server_metadata.grant_types_supported {
        Some(advertised) => advertised
            .iter()
            .filter(|gt| SUPPORTED_GRANT_TYPES.contains(&gt.as_str()))
            .cloned()
            .collect(),
        None => SUPPORTED_GRANT_TYPES.iter().map(|s| s.to_string()).collect(),
    }
}

/// Registers this client with the authorization server (RFC 7591).
///
/// `scopes` of `None` omits the `scope` member entirely; `Some(&[])` sends an
/// empty string.
///
/// # Errors
///
/// - [`AuthError::UnsupportedByServer`] if the server has no registration
///   endpoint.
/// - [`AuthError::RegistrationFailed`] on a non-2xx response, carrying
///   `error: error_description` when the body is a registration error, else
///   the raw body.
/// - [`AuthError::InvalidServerResponse`] if a 2xx body has no `client_id`.
pub async fn fetch_dynamic_registration(
    http: &reqwest::Client,
    server_metadata: &AuthorizationServerMetadata,
    config: &AuthConfig,
    scopes: Option<&[String]>,
) -> Result<ClientRegistration> {
    let endpoint = server_metadata.registration_endpoint.as_deref().ok_or_else(|| {
        AuthError::UnsupportedByServer(format!(
            "{} does not support dynamic client registration",
            server_metadata.issuer
        ))
    })?;

    let body = RegistrationRequest {
        client_name: &config.client_name,
        client_uri: &config.client_uri,
        grant_types: registration_grant_types(server_metadata),
        response_types: ["code"],
        redirect_uris: native_redirect_uris(config),
        scope: scopes.map(|s| s.join(" ")),
        token_endpoint_auth_method: "none",
        application_type: "native",
    };

    tracing::debug!(endpoint = %endpoint, "Registering OAuth client");

    let resp = http
        .post(endpoint)
        .header("Accept", "application/json")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        let details = match serde_json::from_str::<OAuthErrorResponse>(&text) {
            Ok(err) => match err.error_description {
                Some(description) => format!("{}: {}", err.error, description),
                None => err.error,
            },
            Err(_) => text,
        };
        return Err(AuthError::RegistrationFailed(format!(
            "registration to {endpoint} failed: {details}"
        ))
        .into());
    }

    let value: serde_json::Value = resp.json().await?;
    if !is_registration_response(&value) {
        return Err(AuthError::InvalidServerResponse(format!(
            "registration response has no client_id: {value}"
        ))
        .into());
    }
    let registration: ClientRegistration = parse_guarded(value, "registration response")?;
    tracing::info!(client_id = %registration.client_id, "Registered OAuth client");
    Ok(registration)
}

// ---------------------------------------------------------------------------
// Token endpoint
// ---------------------------------------------------------------------------

/// Converts a non-2xx response into the matching error: a structured OAuth
/// error when the body is one, otherwise [`AuthError::Http`].
pub async fn error_from_response(resp: reqwest::Response) -> AuthError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<OAuthErrorResponse>(&body) {
        Ok(err) => AuthError::from_oauth(err.error, err.error_description),
        Err(_) => AuthError::Http { status, body },
    }
}

/// POSTs an `application/x-www-form-urlencoded` request to a token endpoint
/// and validates the token response.
///
/// # Errors
///
/// - [`AuthError::InvalidClient`] / [`AuthError::OAuth`] for structured
///   error bodies.
/// - [`AuthError::Http`] for other non-2xx responses.
/// - [`AuthError::InvalidServerResponse`] when a 2xx body is not a token.
pub async fn post_token_request(
    http: &reqwest::Client,
    token_endpoint: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let resp = http
        .post(token_endpoint)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(error_from_response(resp).await.into());
    }

    let value: serde_json::Value = resp.json().await?;
    if !is_token_response(&value) {
        return Err(
            AuthError::InvalidServerResponse(format!("invalid token response: {value}")).into(),
        );
    }
    parse_guarded(value, "token response")
}
