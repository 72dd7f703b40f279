//! Authorization code flow with an app-URI redirect
//!
//! The redirect lands on `<scheme>://dynamicauthprovider/<authority>/redirect`
//! which the host routes back through
//! [`AuthHost::wait_for_uri_handler`](crate::auth::host::AuthHost::wait_for_uri_handler).
//! When a web redirect page is configured, the authorization server
//! redirects there instead and the page bounces to the app URI carried in
//! `state`.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{
    build_authorization_url, cancellable, code_from_query, exchange_code, open_browser,
    pkce_endpoints, verify_query_param, AuthFlow, FlowContext,
};
use crate::auth::pkce::{random_hex, PkceChallenge};
use crate::auth::protocol::TokenResponse;
use crate::error::{AuthError, Result};

/// PKCE flow that receives the redirect through the host's URI handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlHandlerFlow;

/// Builds the app callback URI, without query, for `authorization_server`.
pub fn callback_base(scheme: &str, authorization_server: &Url) -> String {
    let host = authorization_server.host_str().unwrap_or_default();
    let authority = match authorization_server.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    format!("{scheme}://dynamicauthprovider/{authority}/redirect")
}

#[async_trait]
impl AuthFlow for UrlHandlerFlow {
    fn label(&self) -> &str {
        "URL handler"
    }

    async fn run(
        &self,
        ctx: &FlowContext<'_>,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<TokenResponse> {
        let endpoints = pkce_endpoints(ctx.server_metadata)?;

        let nonce = random_hex(16);
        let base = callback_base(&ctx.config.app_uri_scheme, ctx.authorization_server);
        let callback = format!("{base}?nonce={nonce}");
        let external = ctx.host.create_app_uri(&callback).await?;

        // With a web bounce page the app URI travels in `state`.
        let (redirect_uri, state) = match ctx.config.url_handler_redirect_uri.as_deref() {
            Some(web) => (web.to_string(), external),
            None => (external, nonce.clone()),
        };

        let pkce = PkceChallenge::generate();
        let url = build_authorization_url(
            ctx,
            endpoints.authorization,
            &redirect_uri,
            scopes,
            &pkce,
            &state,
        )?;
        open_browser(ctx, &url).await?;

        let received = cancellable(
            cancel,
            "waiting for the authorization redirect",
            ctx.host.wait_for_uri_handler(&base),
        )
        .await?;

        let query = received
            .split_once('?')
            .map(|(_, q)| q.split('#').next().unwrap_or_default().to_string())
            .ok_or_else(|| {
                AuthError::InvalidServerResponse(format!("redirect {received} has no query"))
            })?;

        let code = code_from_query(&query)?;
        verify_query_param(&query, "nonce", &nonce)?;
        exchange_code(ctx, endpoints.token, &code, &redirect_uri, &pkce.verifier).await
    }
}
