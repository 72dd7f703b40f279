//! Dynamic authentication provider
//!
//! [`DynamicAuthProvider`] composes discovery, the token store and the
//! ordered flow list into the session API:
//!
//! - [`get_sessions`](DynamicAuthProvider::get_sessions) filters by scope
//!   set and refreshes tokens that are about to expire
//! - [`create_session`](DynamicAuthProvider::create_session) tries each flow
//!   in order, asking the user before falling through to the next one
//! - [`remove_session`](DynamicAuthProvider::remove_session) forgets a token
//!
//! A token endpoint answering `invalid_client` triggers re-registration.
//! Client credentials live in a versioned `watch` channel: a flow uses the
//! snapshot taken when it started, and later calls see the new credentials.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::discovery::{self, AuthMetadata};
use crate::auth::flow::{AuthFlow, DeviceCodeFlow, FlowContext, LoopbackFlow, UrlHandlerFlow};
use crate::auth::host::{AuthHost, TokenPersistence};
use crate::auth::protocol::{
    fetch_dynamic_registration, post_token_request, AuthorizationServerMetadata,
    ClientRegistration, ProtectedResourceMetadata, TokenResponse, GRANT_TYPE_REFRESH_TOKEN,
};
use crate::auth::token_store::{Session, SessionsChangeEvent, Token, TokenChange, TokenStore};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

/// Client credentials tagged with a version that increases on every
/// regeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub version: u64,
    pub client: ClientRegistration,
}

/// Shared collaborators of a provider.
#[derive(Clone)]
pub struct ProviderContext {
    pub http: reqwest::Client,
    pub config: Arc<AuthConfig>,
    pub host: Arc<dyn AuthHost>,
    pub persistence: Arc<dyn TokenPersistence>,
}

/// Provider for one (authorization server, resource) pair.
///
/// Mutating operations take `&mut self`; wrap the provider in a
/// `tokio::sync::Mutex` to share it between tasks.
pub struct DynamicAuthProvider {
    http: reqwest::Client,
    config: Arc<AuthConfig>,
    host: Arc<dyn AuthHost>,
    metadata: AuthMetadata,
    credentials: watch::Sender<CredentialSnapshot>,
    store: TokenStore,
    flows: Vec<Box<dyn AuthFlow>>,
}

impl std::fmt::Debug for DynamicAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicAuthProvider")
            .field("authorization_server", &self.metadata.authorization_server.as_str())
            .field("client_id", &self.credentials.borrow().client.client_id)
            .field("flows", &self.flows.iter().map(|f| f.label()).collect::<Vec<_>>())
            .finish()
    }
}

/// Current wall-clock time in milliseconds.
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Order-insensitive key for a scope set.
pub fn scope_key(scopes: &[String]) -> String {
    let mut sorted: Vec<&str> = scopes.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(" ")
}

/// Builds the default flow list for a server.
///
/// Loopback first (local hosts only), then the URL handler, both when the
/// server has an authorization endpoint; device code last when the server
/// has a device authorization endpoint.
pub fn default_flows(
    server_metadata: &AuthorizationServerMetadata,
    host: &dyn AuthHost,
) -> Vec<Box<dyn AuthFlow>> {
    let mut flows: Vec<Box<dyn AuthFlow>> = Vec::new();
    if server_metadata.authorization_endpoint.is_some() {
        if !host.is_remote() {
            flows.push(Box::new(LoopbackFlow));
        }
        flows.push(Box::new(UrlHandlerFlow));
    }
    if server_metadata.device_authorization_endpoint.is_some() {
        flows.push(Box::new(DeviceCodeFlow));
    }
    flows
}

impl DynamicAuthProvider {
    /// Creates a provider from already-discovered metadata and credentials.
    ///
    /// `initial_tokens` seed the store without being persisted again.
    pub fn new(
        ctx: ProviderContext,
        metadata: AuthMetadata,
        client: ClientRegistration,
        initial_tokens: Vec<Token>,
    ) -> Self {
        let flows = default_flows(&metadata.server_metadata, ctx.host.as_ref());
        let (credentials, _) = watch::channel(CredentialSnapshot { version: 0, client });
        tracing::debug!(
            authorization_server = %metadata.authorization_server,
            flows = flows.len(),
            "Created dynamic auth provider"
        );
        Self {
            http: ctx.http,
            config: ctx.config,
            host: ctx.host,
            metadata,
            credentials,
            store: TokenStore::new(ctx.persistence, initial_tokens),
            flows,
        }
    }

    /// Discovers the authorization setup of a resource server and creates a
    /// provider for it.
    ///
    /// # Errors
    ///
    /// Returns discovery errors, or the errors of
    /// [`from_metadata`](Self::from_metadata).
    pub async fn discover(
        ctx: ProviderContext,
        resource_url: &Url,
        www_authenticate: Option<&str>,
        client: Option<ClientRegistration>,
    ) -> Result<Self> {
        let metadata = discovery::discover(&ctx.http, resource_url, www_authenticate).await?;
        Self::from_metadata(ctx, metadata, client).await
    }

    /// Creates a provider for discovered metadata.
    ///
    /// Persisted tokens are loaded from the context's persistence. Without
    /// `client`, the provider registers dynamically and asks the user for
    /// credentials if registration fails.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RegistrationFailed`] when no client credentials
    /// could be obtained.
    pub async fn from_metadata(
        ctx: ProviderContext,
        metadata: AuthMetadata,
        client: Option<ClientRegistration>,
    ) -> Result<Self> {
        let client = match client {
            Some(client) => client,
            None => {
                register_or_prompt(&ctx.http, &ctx.config, ctx.host.as_ref(), &metadata).await?
            }
        };

        let initial = ctx.persistence.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load persisted tokens");
            Vec::new()
        });

        Ok(Self::new(ctx, metadata, client, initial))
    }

    /// Replaces the flow list.
    pub fn with_flows(mut self, flows: Vec<Box<dyn AuthFlow>>) -> Self {
        self.flows = flows;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Provider identifier: the authorization server URL.
    pub fn id(&self) -> &str {
        self.metadata.authorization_server.as_str()
    }

    /// Display name: the authorization server host.
    pub fn label(&self) -> &str {
        self.metadata
            .authorization_server
            .host_str()
            .unwrap_or_else(|| self.id())
    }

    pub fn authorization_server(&self) -> &Url {
        &self.metadata.authorization_server
    }

    pub fn server_metadata(&self) -> &AuthorizationServerMetadata {
        &self.metadata.server_metadata
    }

    pub fn resource_metadata(&self) -> Option<&ProtectedResourceMetadata> {
        self.metadata.resource_metadata.as_ref()
    }

    /// Labels of the flows in the order they are tried.
    pub fn flow_labels(&self) -> Vec<&str> {
        self.flows.iter().map(|f| f.label()).collect()
    }

    /// Current client identifier.
    pub fn client_id(&self) -> String {
        self.credentials.borrow().client.client_id.clone()
    }

    /// Current client secret.
    pub fn client_secret(&self) -> Option<String> {
        self.credentials.borrow().client.client_secret.clone()
    }

    /// Current credential snapshot.
    pub fn credentials(&self) -> CredentialSnapshot {
        self.credentials.borrow().clone()
    }

    /// Notifies when the client credentials are regenerated.
    pub fn on_did_change_client_id(&self) -> watch::Receiver<CredentialSnapshot> {
        self.credentials.subscribe()
    }

    /// Notifies when sessions are added or removed.
    pub fn on_did_change_sessions(&self) -> broadcast::Receiver<SessionsChangeEvent> {
        self.store.subscribe()
    }

    /// Feeds a token list observed in persistent storage into the store.
    pub fn on_did_change_persisted(&mut self, tokens: Vec<Token>) {
        self.store.apply_persisted(tokens);
    }

    /// Stored tokens.
    pub fn tokens(&self) -> &[Token] {
        self.store.tokens()
    }

    fn resource(&self) -> Option<&str> {
        self.metadata
            .resource_metadata
            .as_ref()
            .map(|m| m.resource.as_str())
    }

    fn matching_sessions(&self, scopes: &[String]) -> Vec<Session> {
        let wanted = scope_key(scopes);
        self.store
            .sessions()
            .iter()
            .filter(|s| scope_key(&s.scopes) == wanted)
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Session API
    // -----------------------------------------------------------------------

    /// Returns sessions, optionally only those whose scope set equals
    /// `scopes`.
    ///
    /// Matching tokens within the refresh window are refreshed first. A
    /// token that cannot be refreshed is dropped; the call still succeeds.
    ///
    /// # Errors
    ///
    /// Currently infallible; refresh failures are recovered locally.
    pub async fn get_sessions(&mut self, scopes: Option<&[String]>) -> Result<Vec<Session>> {
        let Some(scopes) = scopes else {
            return Ok(self.store.sessions().to_vec());
        };

        let requested = scopes.join(" ");
        let now = now_ms();
        let buffer = self.config.refresh_buffer_ms();
        let mut change = TokenChange::default();

        for session in self.matching_sessions(scopes) {
            let Some(token) = self.store.find_token(&session.access_token).cloned() else {
                continue;
            };
            if !token.is_near_expiry(now, buffer) {
                continue;
            }

            let Some(refresh) = token.refresh_token.clone() else {
                tracing::debug!(session = %session.id, "Expired token has no refresh token, dropping");
                change.removed.push(token);
                continue;
            };
            change.removed.push(token);

            match self.refresh_token(&refresh).await {
                Ok(response) => {
                    let mut refreshed = response.into_token(now_ms());
                    if refreshed.scope.as_deref() != Some(requested.as_str()) {
                        refreshed.scope = Some(requested.clone());
                    }
                    if refreshed.refresh_token.is_none() {
                        refreshed.refresh_token = Some(refresh);
                    }
                    tracing::info!(session = %session.id, "Refreshed token");
                    change.added.push(refreshed);
                }
                Err(e) => {
                    tracing::error!(session = %session.id, error = %e, "Failed to refresh token");
                    if AuthError::is_invalid_client(&e) {
                        if let Err(e) = self.generate_new_client_id().await {
                            tracing::error!(error = %e, "Failed to regenerate client ID");
                        }
                    }
                }
            }
        }

        self.store.update(change);
        Ok(self.matching_sessions(scopes))
    }

    /// Obtains a new session for `scopes` by running the flows in order.
    ///
    /// When a flow fails and another remains, the user is asked whether to
    /// continue; declining returns the failed flow's error. The last flow's
    /// error is returned directly.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedByServer`] when the server supports
    /// no flow, otherwise the error of the flow that ended the attempt.
    pub async fn create_session(
        &mut self,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<Session> {
        if self.flows.is_empty() {
            return Err(AuthError::UnsupportedByServer(format!(
                "{} offers no supported authentication flow",
                self.id()
            ))
            .into());
        }

        let (response, started_with) = self.run_flows(scopes, cancel).await?;

        let mut token = response.into_token(now_ms());
        let requested = scopes.join(" ");
        if token.scope.as_deref() != Some(requested.as_str()) {
            token.scope = Some(requested);
        }

        let current = self.credentials.borrow().version;
        if current != started_with {
            tracing::warn!(
                started_with,
                current,
                "Client credentials changed while signing in; token was issued to the previous client"
            );
        }

        let access_token = token.access_token.clone();
        self.store.update(TokenChange {
            added: vec![token],
            removed: Vec::new(),
        });

        self.store
            .sessions()
            .iter()
            .find(|s| s.access_token == access_token)
            .cloned()
            .ok_or_else(|| {
                AuthError::InvalidServerResponse("created session was not stored".to_string())
                    .into()
            })
    }

    async fn run_flows(
        &self,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<(TokenResponse, u64)> {
        let last = self.flows.len() - 1;

        for (index, flow) in self.flows.iter().enumerate() {
            let snapshot = self.credentials();
            let ctx = FlowContext {
                http: &self.http,
                config: &self.config,
                host: self.host.as_ref(),
                server_metadata: &self.metadata.server_metadata,
                authorization_server: &self.metadata.authorization_server,
                resource: self.resource(),
                client: &snapshot.client,
            };

            self.host.report_progress(&format!(
                "Signing in to {} using {}",
                self.label(),
                flow.label()
            ));
            tracing::info!(flow = flow.label(), "Starting authentication flow");

            let error = match flow.run(&ctx, scopes, &cancel.child_token()).await {
                Ok(response) => return Ok((response, snapshot.version)),
                Err(e) => e,
            };
            tracing::warn!(flow = flow.label(), error = %error, "Authentication flow failed");

            if AuthError::is_invalid_client(&error) {
                if let Err(e) = self.generate_new_client_id().await {
                    tracing::error!(error = %e, "Failed to regenerate client ID");
                }
            }

            if index == last || cancel.is_cancelled() {
                return Err(error);
            }

            let next = self.flows[index + 1].label();
            let message = format!(
                "Having trouble signing in to '{}'? Would you like to try a different way? ({})",
                self.label(),
                next
            );
            if !self.host.show_continue_notification(&message).await {
                return Err(error);
            }
        }

        Err(AuthError::Cancelled("no authentication flow completed".to_string()).into())
    }

    /// Removes the session with `session_id`. Unknown ids are logged and
    /// ignored.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub async fn remove_session(&mut self, session_id: &str) -> Result<()> {
        let Some(session) = self
            .store
            .sessions()
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
        else {
            tracing::error!(session = %session_id, "Session not found");
            return Ok(());
        };

        let Some(token) = self.store.find_token(&session.access_token).cloned() else {
            tracing::error!(session = %session_id, "Token for session not found");
            return Ok(());
        };

        self.store.update(TokenChange {
            added: Vec::new(),
            removed: vec![token],
        });
        tracing::info!(session = %session_id, "Removed session");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Token endpoint and client registration
    // -----------------------------------------------------------------------

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let endpoint = self
            .metadata
            .server_metadata
            .token_endpoint
            .as_deref()
            .ok_or(AuthError::MissingEndpoint("token_endpoint"))?;
        let snapshot = self.credentials();

        let mut form = vec![
            ("grant_type", GRANT_TYPE_REFRESH_TOKEN),
            ("refresh_token", refresh_token),
            ("client_id", snapshot.client.client_id.as_str()),
        ];
        if let Some(secret) = snapshot.client.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        if let Some(resource) = self.resource() {
            form.push(("resource", resource));
        }

        post_token_request(&self.http, endpoint, &form).await
    }

    /// Replaces the client credentials after an `invalid_client` response.
    ///
    /// Registers again with the resource's supported scopes, falling back
    /// to asking the user. Subscribers of
    /// [`on_did_change_client_id`](Self::on_did_change_client_id) are
    /// notified on success.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RegistrationFailed`] when neither registration
    /// nor the prompt produced credentials.
    pub async fn generate_new_client_id(&self) -> Result<()> {
        tracing::info!(authorization_server = %self.id(), "Regenerating client ID");
        let client =
            register_or_prompt(&self.http, &self.config, self.host.as_ref(), &self.metadata)
                .await?;

        self.credentials.send_modify(|snapshot| {
            snapshot.version += 1;
            snapshot.client = client;
        });
        tracing::info!(client_id = %self.client_id(), "Client ID changed");
        Ok(())
    }
}

async fn register_or_prompt(
    http: &reqwest::Client,
    config: &AuthConfig,
    host: &dyn AuthHost,
    metadata: &AuthMetadata,
) -> Result<ClientRegistration> {
    let scopes = metadata
        .resource_metadata
        .as_ref()
        .and_then(|m| m.scopes_supported.as_deref());

    match fetch_dynamic_registration(http, &metadata.server_metadata, config, scopes).await {
        Ok(client) => Ok(client),
        Err(e) => {
            tracing::warn!(error = %e, "Dynamic client registration failed, asking for credentials");
            host.prompt_for_client_registration(metadata.authorization_server.as_str())
                .await
                .ok_or_else(|| {
                    AuthError::RegistrationFailed(format!("Failed to obtain client ID: {e}")).into()
                })
        }
    }
}
