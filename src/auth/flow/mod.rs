//! Interactive token acquisition flows
//!
//! Each flow turns a scope list into a token response. The provider keeps
//! an ordered list of flows and tries them first to last:
//!
//! - [`LoopbackFlow`]: authorization code + PKCE, redirect to a local
//!   HTTP server
//! - [`UrlHandlerFlow`]: authorization code + PKCE, redirect to an app URI
//!   handled by the host
//! - [`DeviceCodeFlow`]: RFC 8628 device authorization grant
//!
//! Flows run under a [`CancellationToken`]; every long wait is raced
//! against it and a cancelled wait surfaces as [`AuthError::Cancelled`].

use std::future::Future;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::host::AuthHost;
use crate::auth::pkce::PkceChallenge;
use crate::auth::protocol::{
    post_token_request, AuthorizationServerMetadata, ClientRegistration, TokenResponse,
    GRANT_TYPE_AUTHORIZATION_CODE,
};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

pub mod device_code;
pub mod loopback;
pub mod url_handler;

pub use device_code::DeviceCodeFlow;
pub use loopback::LoopbackFlow;
pub use url_handler::UrlHandlerFlow;

/// Pattern for the authorization code in a raw, undecoded query string.
const CODE_PATTERN: &str = r"[?&]code=([^&]+)";

/// Everything a flow needs from the provider for one run.
///
/// `client` is the credential snapshot taken when the run started.
pub struct FlowContext<'a> {
    pub http: &'a reqwest::Client,
    pub config: &'a AuthConfig,
    pub host: &'a dyn AuthHost,
    pub server_metadata: &'a AuthorizationServerMetadata,
    pub authorization_server: &'a Url,
    /// RFC 8707 resource indicator.
    pub resource: Option<&'a str>,
    pub client: &'a ClientRegistration,
}

/// A way of obtaining a token interactively.
#[async_trait]
pub trait AuthFlow: Send + Sync {
    /// Short human-readable name, used in prompts.
    fn label(&self) -> &str;

    /// Runs the flow to completion.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Cancelled`] when `cancel` fires or the user
    /// declines, and the flow-specific failure otherwise.
    async fn run(
        &self,
        ctx: &FlowContext<'_>,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<TokenResponse>;
}

/// Awaits `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AuthError::Cancelled(format!("{what} was cancelled")).into()),
        result = fut => result,
    }
}

// ---------------------------------------------------------------------------
// Shared PKCE redirect helpers
// ---------------------------------------------------------------------------

/// The endpoints a redirect-based flow needs.
pub(crate) struct PkceEndpoints<'a> {
    pub authorization: &'a str,
    pub token: &'a str,
}

pub(crate) fn pkce_endpoints<'a>(
    metadata: &'a AuthorizationServerMetadata,
) -> Result<PkceEndpoints<'a>> {
    let authorization = metadata
        .authorization_endpoint
        .as_deref()
        .ok_or(AuthError::MissingEndpoint("authorization_endpoint"))?;
    let token = metadata
        .token_endpoint
        .as_deref()
        .ok_or(AuthError::MissingEndpoint("token_endpoint"))?;
    Ok(PkceEndpoints {
        authorization,
        token,
    })
}

/// Builds the authorization request URL.
///
/// `scope` is omitted for an empty scope list and `resource` when the
/// resource server published no metadata.
pub(crate) fn build_authorization_url(
    ctx: &FlowContext<'_>,
    authorization_endpoint: &str,
    redirect_uri: &str,
    scopes: &[String],
    pkce: &PkceChallenge,
    state: &str,
) -> Result<String> {
    let mut url = Url::parse(authorization_endpoint).map_err(|e| {
        AuthError::InvalidServerResponse(format!(
            "invalid authorization endpoint {authorization_endpoint}: {e}"
        ))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("client_id", &ctx.client.client_id);
        query.append_pair("response_type", "code");
        query.append_pair("code_challenge", &pkce.challenge);
        query.append_pair("code_challenge_method", pkce.method);
        query.append_pair("redirect_uri", redirect_uri);
        query.append_pair("state", state);
        if !scopes.is_empty() {
            query.append_pair("scope", &scopes.join(" "));
        }
        if let Some(resource) = ctx.resource {
            query.append_pair("resource", resource);
        }
    }

    Ok(url.to_string())
}

/// Opens the authorization URL, failing when the host could not.
pub(crate) async fn open_browser(ctx: &FlowContext<'_>, url: &str) -> Result<()> {
    tracing::debug!(url = %url, "Opening authorization URL");
    if ctx.host.open_external_uri(url).await {
        Ok(())
    } else {
        Err(AuthError::BrowserOpen(url.to_string()).into())
    }
}

/// Returns the decoded value of `name` in a raw query string.
pub(crate) fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Extracts the authorization code from a redirect query.
///
/// An `error` parameter fails with the OAuth error it names. The code is
/// returned exactly as it appeared in the query, without percent-decoding.
///
/// # Errors
///
/// Returns [`AuthError::OAuth`] / [`AuthError::InvalidClient`] for error
/// redirects and [`AuthError::InvalidServerResponse`] when no code is
/// present.
pub fn code_from_query(query: &str) -> Result<String> {
    if let Some(error) = query_param(query, "error") {
        return Err(AuthError::from_oauth(error, query_param(query, "error_description")).into());
    }

    let pattern = Regex::new(CODE_PATTERN)
        .map_err(|e| AuthError::Config(format!("invalid code pattern: {e}")))?;
    let normalized = if query.starts_with('?') {
        query.to_string()
    } else {
        format!("?{query}")
    };

    pattern
        .captures(&normalized)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            AuthError::InvalidServerResponse("redirect did not include a code".to_string()).into()
        })
}

/// Fails unless the redirect query carries `name=expected`.
pub(crate) fn verify_query_param(query: &str, name: &str, expected: &str) -> Result<()> {
    match query_param(query, name) {
        Some(value) if value == expected => Ok(()),
        _ => Err(AuthError::InvalidServerResponse(format!(
            "{name} mismatch in authorization redirect"
        ))
        .into()),
    }
}

/// Exchanges an authorization code for a token.
pub(crate) async fn exchange_code(
    ctx: &FlowContext<'_>,
    token_endpoint: &str,
    code: &str,
    redirect_uri: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", GRANT_TYPE_AUTHORIZATION_CODE),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", ctx.client.client_id.as_str()),
        ("code_verifier", verifier),
    ];
    if let Some(secret) = ctx.client.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    if let Some(resource) = ctx.resource {
        form.push(("resource", resource));
    }

    tracing::debug!(endpoint = %token_endpoint, "Exchanging authorization code");
    post_token_request(ctx.http, token_endpoint, &form).await
}
