//! Authorization metadata discovery
//!
//! Resolves the protected resource metadata (RFC 9728) and authorization
//! server metadata (RFC 8414 / OpenID Connect Discovery) for a resource
//! server that answered `401 Unauthorized`.
//!
//! # Discovery sequence
//!
//! 1. If the `WWW-Authenticate` header carries a `Bearer` challenge with a
//!    `resource_metadata` parameter, that document is fetched and its
//!    `resource` is checked against the URL it was published at.
//! 2. The authorization server is the first entry of
//!    `authorization_servers`, or the origin of the original request.
//! 3. Three well-known layouts are tried for the authorization server
//!    metadata (see [`build_as_candidate_urls`]).
//! 4. When none answers, conventional endpoints are synthesized with
//!    [`get_default_metadata_for_url`].

use url::Url;

use crate::auth::protocol::{
    get_default_metadata_for_url, get_resource_server_base_url_from_discovery_url,
    is_authorization_server_metadata, is_protected_resource_metadata, parse_guarded,
    parse_www_authenticate_header, AuthorizationServerMetadata, ProtectedResourceMetadata,
    AUTH_SERVER_METADATA_DISCOVERY_PATH, OPENID_CONNECT_DISCOVERY_PATH,
};
use crate::error::{AuthError, Result};

/// Everything discovery learned about a resource server's authorization
/// setup.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthMetadata {
    /// The authorization server the metadata belongs to.
    pub authorization_server: Url,

    /// Fetched or synthesized authorization server metadata.
    pub server_metadata: AuthorizationServerMetadata,

    /// Protected resource metadata, when the server published a challenge.
    pub resource_metadata: Option<ProtectedResourceMetadata>,
}

/// Runs discovery from a live `401` response.
///
/// Uses the final response URL and its `WWW-Authenticate` header.
///
/// # Errors
///
/// See [`discover`].
pub async fn discover_from_response(
    http: &reqwest::Client,
    response: &reqwest::Response,
) -> Result<AuthMetadata> {
    let www_authenticate = response
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok());
    discover(http, response.url(), www_authenticate).await
}

/// Resolves authorization metadata for `request_url`.
///
/// # Arguments
///
/// * `http` - Shared [`reqwest::Client`]
/// * `request_url` - URL of the request that was rejected with `401`
/// * `www_authenticate` - The `WWW-Authenticate` header of that response
///
/// # Errors
///
/// Returns [`AuthError::Discovery`] when a protected resource metadata
/// document was advertised but could not be fetched, is not valid, or names
/// a different resource than the one it was published for. Missing
/// authorization server metadata is not an error.
///
/// # Examples
///
/// ```no_run
/// use mcp_dynamic_auth::auth::discovery::discover;
/// use url::Url;
///
/// # async fn example() -> mcp_dynamic_auth::error::Result<()> {
/// let http = reqwest::Client::new();
/// let url = Url::parse("https://api.example.com/mcp")?;
/// let meta = discover(
///     &http,
///     &url,
///     Some(r#"Bearer resource_metadata="https://api.example.com/.well-known/oauth-protected-resource/mcp""#),
/// )
/// .await?;
/// println!("authorization server: {}", meta.authorization_server);
/// # Ok(())
/// # }
/// ```
pub async fn discover(
    http: &reqwest::Client,
    request_url: &Url,
    www_authenticate: Option<&str>,
) -> Result<AuthMetadata> {
    let resource_metadata_url = www_authenticate
        .map(parse_www_authenticate_header)
        .filter(|challenge| challenge.scheme.eq_ignore_ascii_case("Bearer"))
        .and_then(|challenge| challenge.params.get("resource_metadata").cloned());

    let resource_metadata = match resource_metadata_url {
        Some(url) => Some(fetch_protected_resource_metadata(http, &url).await?),
        None => None,
    };

    let origin = Url::parse(&request_url.origin().ascii_serialization()).map_err(|e| {
        AuthError::Discovery(format!("request URL {request_url} has no origin: {e}"))
    })?;

    let authorization_server = match resource_metadata
        .as_ref()
        .and_then(|m| m.authorization_servers.as_ref())
        .and_then(|servers| servers.first())
    {
        Some(server) => Url::parse(server).map_err(|e| {
            AuthError::Discovery(format!("invalid authorization server {server}: {e}"))
        })?,
        None => origin,
    };

    let server_metadata = match fetch_authorization_server_metadata(http, &authorization_server)
        .await
    {
        Ok(meta) => meta,
        Err(e) => {
            tracing::info!(
                authorization_server = %authorization_server,
                error = %e,
                "No authorization server metadata found, using default endpoints"
            );
            let mut meta = get_default_metadata_for_url(&authorization_server);
            meta.scopes_supported = Some(
                resource_metadata
                    .as_ref()
                    .and_then(|m| m.scopes_supported.clone())
                    .unwrap_or_default(),
            );
            meta
        }
    };

    Ok(AuthMetadata {
        authorization_server,
        server_metadata,
        resource_metadata,
    })
}

/// Fetches and validates a protected resource metadata document.
///
/// The document's `resource` must equal the resource identifier derived
/// from `url` (RFC 9728 section 3.3).
///
/// # Errors
///
/// Returns [`AuthError::Discovery`] on a non-200 response, an invalid
/// document, or a resource mismatch.
pub async fn fetch_protected_resource_metadata(
    http: &reqwest::Client,
    url: &str,
) -> Result<ProtectedResourceMetadata> {
    tracing::debug!(url = %url, "Fetching protected resource metadata");

    let resp = http
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| AuthError::Discovery(format!("metadata fetch from {url} failed: {e}")))?;

    if resp.status() != reqwest::StatusCode::OK {
        return Err(AuthError::Discovery(format!(
            "failed to fetch resource metadata from {url}: HTTP {}",
            resp.status().as_u16()
        ))
        .into());
    }

    let value: serde_json::Value = resp.json().await.map_err(|e| {
        AuthError::Discovery(format!("resource metadata from {url} is not JSON: {e}"))
    })?;
    if !is_protected_resource_metadata(&value) {
        return Err(
            AuthError::Discovery(format!("invalid resource metadata from {url}: {value}")).into(),
        );
    }
    let metadata: ProtectedResourceMetadata = parse_guarded(value, "resource metadata")?;

    let expected = get_resource_server_base_url_from_discovery_url(url)?;
    let advertised = Url::parse(&metadata.resource).map_err(|e| {
        AuthError::Discovery(format!("invalid resource {}: {e}", metadata.resource))
    })?;
    if advertised.as_str() != expected {
        return Err(AuthError::Discovery(format!(
            "protected resource {} does not match expected {expected}",
            metadata.resource
        ))
        .into());
    }

    Ok(metadata)
}

/// Builds the well-known URLs tried for authorization server metadata, in
/// order:
///
/// 1. `origin + /.well-known/oauth-authorization-server + path`
/// 2. `origin + /.well-known/openid-configuration + path`
/// 3. `authorization_server + /.well-known/openid-configuration`
pub fn build_as_candidate_urls(authorization_server: &Url) -> Vec<Url> {
    let origin = authorization_server.origin().ascii_serialization();
    let path = match authorization_server.path() {
        "/" => "",
        p => p,
    };
    let appended = format!(
        "{}{}",
        authorization_server.as_str().trim_end_matches('/'),
        OPENID_CONNECT_DISCOVERY_PATH
    );

    [
        format!("{origin}{AUTH_SERVER_METADATA_DISCOVERY_PATH}{path}"),
        format!("{origin}{OPENID_CONNECT_DISCOVERY_PATH}{path}"),
        appended,
    ]
    .into_iter()
    .filter_map(|s| Url::parse(&s).ok())
    .collect()
}

/// Fetches authorization server metadata, stopping at the first candidate
/// URL that answers `200`.
///
/// # Errors
///
/// Returns [`AuthError::Discovery`] when no candidate answers `200`, or
/// [`AuthError::InvalidServerResponse`] when the answering document is not
/// authorization server metadata.
pub async fn fetch_authorization_server_metadata(
    http: &reqwest::Client,
    authorization_server: &Url,
) -> Result<AuthorizationServerMetadata> {
    for candidate in build_as_candidate_urls(authorization_server) {
        tracing::debug!(url = %candidate, "Trying authorization server metadata");

        let resp = match http
            .get(candidate.clone())
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url = %candidate, error = %e, "Metadata request failed");
                continue;
            }
        };

        if resp.status() != reqwest::StatusCode::OK {
            continue;
        }

        let value: serde_json::Value = resp.json().await?;
        if !is_authorization_server_metadata(&value) {
            return Err(AuthError::InvalidServerResponse(format!(
                "invalid authorization server metadata at {candidate}"
            ))
            .into());
        }
        return parse_guarded(value, "authorization server metadata");
    }

    Err(AuthError::Discovery(format!(
        "authorization server metadata not found for {authorization_server}"
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(server: &str) -> Vec<String> {
        build_as_candidate_urls(&Url::parse(server).unwrap())
            .into_iter()
            .map(|u| u.to_string())
            .collect()
    }

    #[test]
    fn test_candidates_for_root_issuer() {
        assert_eq!(
            urls("https://auth.example.com"),
            vec![
                "https://auth.example.com/.well-known/oauth-authorization-server",
                "https://auth.example.com/.well-known/openid-configuration",
                "https://auth.example.com/.well-known/openid-configuration",
            ]
        );
    }

    #[test]
    fn test_candidates_for_issuer_with_path() {
        assert_eq!(
            urls("https://auth.example.com/tenant1"),
            vec![
                "https://auth.example.com/.well-known/oauth-authorization-server/tenant1",
                "https://auth.example.com/.well-known/openid-configuration/tenant1",
                "https://auth.example.com/tenant1/.well-known/openid-configuration",
            ]
        );
    }

    #[test]
    fn test_candidates_keep_port() {
        let candidates = urls("http://127.0.0.1:9000/");
        assert_eq!(
            candidates[0],
            "http://127.0.0.1:9000/.well-known/oauth-authorization-server"
        );
        assert_eq!(
            candidates[2],
            "http://127.0.0.1:9000/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_candidates_trailing_slash_path_appends_once() {
        let candidates = urls("https://auth.example.com/tenant1/");
        assert_eq!(
            candidates[2],
            "https://auth.example.com/tenant1/.well-known/openid-configuration"
        );
    }
}
