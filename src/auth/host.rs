//! Host capabilities consumed by the provider
//!
//! The provider never talks to a UI or to storage directly. Browser launch,
//! prompts, progress and the app-URI handler are reached through
//! [`AuthHost`]; token persistence goes through [`TokenPersistence`].

use async_trait::async_trait;

use crate::auth::protocol::ClientRegistration;
use crate::auth::token_store::Token;
use crate::error::Result;

/// User-facing capabilities of the embedding application.
///
/// Implementations must be cheap to share; the provider holds one behind an
/// `Arc` and every flow borrows it.
#[async_trait]
pub trait AuthHost: Send + Sync {
    /// Opens `uri` in the user's browser. Returns `false` when nothing could
    /// be opened.
    async fn open_external_uri(&self, uri: &str) -> bool;

    /// Resolves an app callback URI (`<scheme>://...`) into a URI the
    /// browser can navigate to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot route app URIs.
    async fn create_app_uri(&self, callback_uri: &str) -> Result<String>;

    /// Waits until the app URI handler receives a URI starting with
    /// `expected_uri` and returns the full received URI, query included.
    ///
    /// # Errors
    ///
    /// Returns an error if the host has no URI handler.
    async fn wait_for_uri_handler(&self, expected_uri: &str) -> Result<String>;

    /// Asks the user for client credentials for `server_url` after dynamic
    /// registration failed. `None` means the user declined.
    async fn prompt_for_client_registration(&self, server_url: &str)
        -> Option<ClientRegistration>;

    /// Binary continue/cancel prompt. Returns `true` to continue.
    async fn show_continue_notification(&self, message: &str) -> bool;

    /// Shows the device user code and verification URI. Returns `false` when
    /// the user dismissed it.
    async fn show_device_code_modal(&self, user_code: &str, verification_uri: &str) -> bool;

    /// Reports progress of a long-running operation.
    fn report_progress(&self, message: &str) {
        tracing::info!("{}", message);
    }

    /// Whether the host runs remotely from the user's browser, in which case
    /// a local loopback server is unreachable.
    fn is_remote(&self) -> bool {
        false
    }
}

/// Storage hook for the token set.
///
/// `set` receives the complete token list after every change. Changes made
/// by another process are fed back through
/// [`TokenStore::apply_persisted`](super::token_store::TokenStore::apply_persisted).
pub trait TokenPersistence: Send + Sync {
    /// Persists the full token set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the write.
    fn set(&self, tokens: &[Token]) -> Result<()>;

    /// Loads the persisted token set, empty when nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load(&self) -> Result<Vec<Token>>;
}
