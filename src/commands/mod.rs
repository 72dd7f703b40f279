/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes four top-level command modules:

- `discover` - Print the discovered authorization setup
- `login`    - Acquire a new session through the available flows
- `sessions` - List (and refresh) stored sessions
- `logout`   - Remove a stored session

Every handler probes the resource URL, runs discovery on the `401`
challenge and keys the keyring entries by the authorization server.
*/

use std::sync::Arc;

use reqwest::StatusCode;
use url::Url;

use crate::auth::discovery::{self, AuthMetadata};
use crate::auth::host::{AuthHost, TokenPersistence};
use crate::auth::protocol::ClientRegistration;
use crate::auth::token_store::{KeyringPersistence, Session};
use crate::auth::{DynamicAuthProvider, ProviderContext};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

/// Parses the resource URL given on the command line.
fn parse_resource_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| AuthError::Config(format!("Invalid URL {}: {}", url, e)).into())
}

/// Requests `url` unauthenticated and runs discovery on the answer.
///
/// A resource that does not answer `401` is still probed for
/// authorization server metadata at its origin.
async fn probe(http: &reqwest::Client, url: &Url) -> Result<AuthMetadata> {
    let response = http.get(url.clone()).send().await?;
    if response.status() == StatusCode::UNAUTHORIZED {
        discovery::discover_from_response(http, &response).await
    } else {
        tracing::info!(
            status = %response.status(),
            "Resource did not challenge for authentication, probing its origin"
        );
        discovery::discover(http, url, None).await
    }
}

/// Provider plus the keyring backend that holds its client registration.
struct OpenedProvider {
    provider: DynamicAuthProvider,
    keyring: Arc<KeyringPersistence>,
    stored_client: Option<ClientRegistration>,
}

impl OpenedProvider {
    /// Writes the client registration back when it differs from the stored
    /// one.
    fn save_client_if_changed(&mut self) {
        let current = self.provider.credentials().client;
        if self.stored_client.as_ref() == Some(&current) {
            return;
        }
        match self.keyring.save_client(&current) {
            Ok(()) => self.stored_client = Some(current),
            Err(e) => tracing::warn!(error = %e, "Failed to store client registration"),
        }
    }
}

/// Discovers `url` and opens a keyring-backed provider for it.
///
/// With `register` unset and no stored client, returns `None` instead of
/// registering a new client.
async fn open_provider(
    config: AuthConfig,
    url: &str,
    host: Arc<dyn AuthHost>,
    register: bool,
) -> Result<Option<OpenedProvider>> {
    let url = parse_resource_url(url)?;
    let http = reqwest::Client::new();
    let metadata = probe(&http, &url).await?;

    let keyring = Arc::new(KeyringPersistence::new(
        &config.keyring_service,
        metadata.authorization_server.as_str(),
    ));
    let stored_client = keyring.load_client().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to read stored client registration");
        None
    });
    if stored_client.is_none() && !register {
        return Ok(None);
    }

    let persistence: Arc<dyn TokenPersistence> = keyring.clone();
    let ctx = ProviderContext {
        http,
        config: Arc::new(config),
        host,
        persistence,
    };
    let provider = DynamicAuthProvider::from_metadata(ctx, metadata, stored_client.clone()).await?;

    let mut opened = OpenedProvider {
        provider,
        keyring,
        stored_client,
    };
    opened.save_client_if_changed();
    Ok(Some(opened))
}

fn print_session(session: &Session) {
    let scopes = if session.scopes.is_empty() {
        "(none)".to_string()
    } else {
        session.scopes.join(" ")
    };
    println!(
        "{}  {:<24}  {}",
        session.id, session.account.label, scopes
    );
}

/// Discover command
pub mod discover {
    use super::*;

    /// Prints what discovery found for `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - URL of the protected resource
    /// * `json` - Print machine-readable JSON instead of a summary
    pub async fn run_discover(url: String, json: bool) -> Result<()> {
        let parsed = parse_resource_url(&url)?;
        let http = reqwest::Client::new();
        let metadata = probe(&http, &parsed).await?;

        if json {
            let value = serde_json::json!({
                "authorization_server": metadata.authorization_server.as_str(),
                "server_metadata": metadata.server_metadata,
                "resource_metadata": metadata.resource_metadata,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        let meta = &metadata.server_metadata;
        println!("\nAuthorization Server\n");
        println!("Server:         {}", metadata.authorization_server);
        println!("Issuer:         {}", meta.issuer);
        println!(
            "Authorize:      {}",
            meta.authorization_endpoint.as_deref().unwrap_or("-")
        );
        println!(
            "Token:          {}",
            meta.token_endpoint.as_deref().unwrap_or("-")
        );
        println!(
            "Registration:   {}",
            meta.registration_endpoint.as_deref().unwrap_or("-")
        );
        println!(
            "Device:         {}",
            meta.device_authorization_endpoint.as_deref().unwrap_or("-")
        );
        if let Some(resource) = &metadata.resource_metadata {
            println!("Resource:       {}", resource.resource);
            if let Some(scopes) = &resource.scopes_supported {
                println!("Scopes:         {}", scopes.join(" "));
            }
        }
        println!();
        Ok(())
    }
}

/// Login command
pub mod login {
    use super::*;
    use crate::terminal_host::TerminalHost;
    use tokio_util::sync::CancellationToken;

    /// Signs in to the server protecting `url` and stores the session.
    ///
    /// Ctrl-C cancels the running flow.
    ///
    /// # Arguments
    ///
    /// * `config` - Provider configuration (consumed)
    /// * `url` - URL of the protected resource
    /// * `scopes` - Scopes to request
    /// * `remote` - Skip the loopback flow
    pub async fn run_login(
        config: AuthConfig,
        url: String,
        scopes: Vec<String>,
        remote: bool,
    ) -> Result<()> {
        let host: Arc<dyn AuthHost> = Arc::new(TerminalHost::new(remote));
        let Some(mut opened) = open_provider(config, &url, host, true).await? else {
            return Err(AuthError::RegistrationFailed("no client registration".to_string()).into());
        };
        tracing::info!(
            server = opened.provider.label(),
            flows = ?opened.provider.flow_labels(),
            "Signing in"
        );

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let result = opened.provider.create_session(&scopes, &cancel).await;
        interrupt.abort();
        // A mid-login client regeneration must survive the run.
        opened.save_client_if_changed();

        let session = result?;
        println!(
            "Signed in to {} as {}",
            opened.provider.label(),
            session.account.label
        );
        print_session(&session);
        Ok(())
    }
}

/// Sessions command
pub mod sessions {
    use super::*;
    use crate::terminal_host::TerminalHost;

    /// Lists stored sessions for `url`, refreshing tokens near expiry.
    ///
    /// # Arguments
    ///
    /// * `config` - Provider configuration (consumed)
    /// * `url` - URL of the protected resource
    /// * `scopes` - Exact scope filter; empty lists every session
    pub async fn list_sessions(config: AuthConfig, url: String, scopes: Vec<String>) -> Result<()> {
        let host: Arc<dyn AuthHost> = Arc::new(TerminalHost::default());
        let Some(mut opened) = open_provider(config, &url, host, false).await? else {
            println!("No sessions");
            return Ok(());
        };

        let filter = (!scopes.is_empty()).then_some(scopes.as_slice());
        let sessions = opened.provider.get_sessions(filter).await?;
        opened.save_client_if_changed();

        if sessions.is_empty() {
            println!("No sessions");
            return Ok(());
        }
        for session in &sessions {
            print_session(session);
        }
        Ok(())
    }
}

/// Logout command
pub mod logout {
    use super::*;
    use crate::terminal_host::TerminalHost;

    /// Removes the session `session_id` stored for `url`.
    ///
    /// An unknown session is reported but not treated as an error.
    pub async fn run_logout(config: AuthConfig, url: String, session_id: String) -> Result<()> {
        let host: Arc<dyn AuthHost> = Arc::new(TerminalHost::default());
        let Some(mut opened) = open_provider(config, &url, host, false).await? else {
            println!("No sessions");
            return Ok(());
        };

        let known = opened
            .provider
            .get_sessions(None)
            .await?
            .iter()
            .any(|s| s.id == session_id);
        opened.provider.remove_session(&session_id).await?;

        if known {
            println!("Removed session {}", session_id);
        } else {
            println!("No session {}", session_id);
        }
        Ok(())
    }
}
