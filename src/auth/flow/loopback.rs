//! Authorization code flow with a loopback redirect server
//!
//! Binds `127.0.0.1` on the configured port (falling back to an ephemeral
//! port when it is taken), serves the redirect on `/` with axum, and
//! exchanges the received code.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::{
    build_authorization_url, cancellable, code_from_query, exchange_code, open_browser,
    pkce_endpoints, verify_query_param, AuthFlow, FlowContext, PkceEndpoints,
};
use crate::auth::pkce::{random_hex, PkceChallenge};
use crate::auth::protocol::TokenResponse;
use crate::error::{AuthError, Result};

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Signed in</title></head>\
<body><h1>Authentication complete</h1><p>You can close this window and return to the application.</p></body></html>";

const IGNORED_PAGE: &str = "<!DOCTYPE html><html><body><p>Waiting for authorization...</p></body></html>";

type RedirectSender = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// PKCE flow that receives the redirect on a local HTTP server.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackFlow;

#[async_trait]
impl AuthFlow for LoopbackFlow {
    fn label(&self) -> &str {
        "local server"
    }

    async fn run(
        &self,
        ctx: &FlowContext<'_>,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<TokenResponse> {
        let endpoints = pkce_endpoints(ctx.server_metadata)?;

        let listener = bind_loopback(ctx.config.loopback_port).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}/", port);
        tracing::info!(redirect_uri = %redirect_uri, "Loopback redirect server listening");

        let (tx, rx) = oneshot::channel();
        let app = Router::new()
            .route("/", get(handle_redirect))
            .with_state(Arc::new(Mutex::new(Some(tx))));
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let result = authorize(ctx, &endpoints, &redirect_uri, scopes, rx, cancel).await;

        server.abort();
        result
    }
}

async fn authorize(
    ctx: &FlowContext<'_>,
    endpoints: &PkceEndpoints<'_>,
    redirect_uri: &str,
    scopes: &[String],
    redirect: oneshot::Receiver<String>,
    cancel: &CancellationToken,
) -> Result<TokenResponse> {
    let pkce = PkceChallenge::generate();
    let state = random_hex(16);
    let url = build_authorization_url(
        ctx,
        endpoints.authorization,
        redirect_uri,
        scopes,
        &pkce,
        &state,
    )?;
    open_browser(ctx, &url).await?;

    let query = cancellable(cancel, "waiting for the browser redirect", async {
        redirect.await.map_err(|_| {
            anyhow::Error::from(AuthError::Cancelled(
                "loopback server stopped".to_string(),
            ))
        })
    })
    .await?;

    let code = code_from_query(&query)?;
    verify_query_param(&query, "state", &state)?;
    exchange_code(ctx, endpoints.token, &code, redirect_uri, &pkce.verifier).await
}

/// Binds the loopback listener, preferring `port`.
pub async fn bind_loopback(port: u16) -> Result<TcpListener> {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::warn!(port, error = %e, "Loopback port unavailable, using an ephemeral port");
            Ok(TcpListener::bind(("127.0.0.1", 0)).await?)
        }
    }
}

/// Forwards the first redirect carrying `code` or `error` to the flow.
async fn handle_redirect(
    State(sender): State<RedirectSender>,
    RawQuery(query): RawQuery,
) -> Html<&'static str> {
    let query = query.unwrap_or_default();
    if query_is_redirect(&query) {
        if let Some(tx) = sender.lock().await.take() {
            let _ = tx.send(query);
            return Html(SUCCESS_PAGE);
        }
    }
    Html(IGNORED_PAGE)
}

fn query_is_redirect(query: &str) -> bool {
    query
        .split('&')
        .any(|pair| pair.starts_with("code=") || pair.starts_with("error="))
}
