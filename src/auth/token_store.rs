//! Token state and the session projection derived from it
//!
//! [`TokenStore`] owns the canonical token list. Every write recomputes the
//! session list, diffs it against the previous snapshot by access token and
//! broadcasts the difference as a [`SessionsChangeEvent`].
//!
//! Two [`TokenPersistence`] backends live here as well:
//! [`MemoryPersistence`] for embedders that persist elsewhere, and
//! [`KeyringPersistence`] which keeps the token list in the OS keyring.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::auth::host::TokenPersistence;
use crate::auth::protocol::{get_claims_from_jwt, ClientRegistration};
use crate::error::{AuthError, Result};

const CHANGE_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// A token as held by the store: the token endpoint response plus the time
/// it was received.
///
/// # Examples
///
/// ```
/// use mcp_dynamic_auth::auth::token_store::Token;
///
/// let token = Token {
///     access_token: "tok".to_string(),
///     token_type: "Bearer".to_string(),
///     refresh_token: None,
///     expires_in: None,
///     scope: None,
///     id_token: None,
///     created_at: 0,
/// };
///
/// // A token without a lifetime never needs refreshing.
/// assert!(!token.is_near_expiry(i64::MAX, 300_000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The access token string. Unique within a store.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// Refresh token for obtaining a new access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Lifetime in seconds from `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Space-separated scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// OpenID Connect ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Wall-clock milliseconds at which the token was received.
    pub created_at: i64,
}

impl Token {
    /// Returns `true` when `now_ms` is within `buffer_ms` of expiry.
    ///
    /// Tokens without `expires_in` never expire.
    pub fn is_near_expiry(&self, now_ms: i64, buffer_ms: i64) -> bool {
        match self.expires_in {
            None => false,
            Some(secs) => {
                let lifetime_ms = i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX);
                now_ms > self.created_at.saturating_add(lifetime_ms).saturating_sub(buffer_ms)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session projection
// ---------------------------------------------------------------------------

/// Account a session belongs to, as far as the token's claims reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The `sub` claim, or `"unknown"`.
    pub id: String,
    /// A display name, or `"MCP"`.
    pub label: String,
}

/// Read-only view of a stored token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier derived from the access token.
    pub id: String,
    /// Bearer token to present to the resource server.
    pub access_token: String,
    /// The account the token was issued to.
    pub account: Account,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// OpenID Connect ID token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Session list difference emitted after a store write.
///
/// Sessions are matched by access token, so a replaced token with an
/// unchanged access token produces no event. `changed` is always empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionsChangeEvent {
    pub added: Vec<Session>,
    pub removed: Vec<Session>,
    pub changed: Vec<Session>,
}

/// Tokens to add and remove in one store write.
#[derive(Debug, Clone, Default)]
pub struct TokenChange {
    pub added: Vec<Token>,
    pub removed: Vec<Token>,
}

/// Derives the session identifier for an access token: the first 16 hex
/// digits of its SHA-256.
pub fn session_id(access_token: &str) -> String {
    let digest = Sha256::digest(access_token.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

fn claims_of(jwt: &str, which: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    match get_claims_from_jwt(jwt) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::trace!(token = which, error = %e, "Token claims unavailable");
            None
        }
    }
}

/// Projects a token into a session.
pub fn derive_session(token: &Token) -> Session {
    let claims = token
        .id_token
        .as_deref()
        .and_then(|t| claims_of(t, "id_token"))
        .or_else(|| claims_of(&token.access_token, "access_token"))
        .unwrap_or_default();

    let claim = |name: &str| {
        claims
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let scopes = token
        .scope
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| claim("scope"))
        .map(|s| s.split(' ').map(str::to_string).collect())
        .unwrap_or_default();

    Session {
        id: session_id(&token.access_token),
        access_token: token.access_token.clone(),
        account: Account {
            id: claim("sub").unwrap_or_else(|| "unknown".to_string()),
            label: claim("preferred_username")
                .or_else(|| claim("name"))
                .or_else(|| claim("email"))
                .unwrap_or_else(|| "MCP".to_string()),
        },
        scopes,
        id_token: token.id_token.clone(),
    }
}

fn same_sessions(a: &[Session], b: &[Session]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.access_token == y.access_token)
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Canonical token list with a derived, diffed session list.
///
/// All writes go through [`update`](Self::update) or
/// [`apply_persisted`](Self::apply_persisted); both take `&mut self`, so
/// callers sharing a store must serialize access themselves.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use mcp_dynamic_auth::auth::token_store::{MemoryPersistence, Token, TokenChange, TokenStore};
///
/// let mut store = TokenStore::new(Arc::new(MemoryPersistence::default()), Vec::new());
/// let mut changes = store.subscribe();
///
/// store.update(TokenChange {
///     added: vec![Token {
///         access_token: "tok".to_string(),
///         token_type: "Bearer".to_string(),
///         refresh_token: None,
///         expires_in: None,
///         scope: Some("read".to_string()),
///         id_token: None,
///         created_at: 0,
///     }],
///     removed: Vec::new(),
/// });
///
/// assert_eq!(store.sessions().len(), 1);
/// assert_eq!(changes.try_recv().unwrap().added.len(), 1);
/// ```
pub struct TokenStore {
    tokens: Vec<Token>,
    sessions: Vec<Session>,
    changes: broadcast::Sender<SessionsChangeEvent>,
    persistence: Arc<dyn TokenPersistence>,
}

impl TokenStore {
    /// Creates a store seeded with `initial` tokens. Duplicate access tokens
    /// keep the last occurrence. Seeding neither persists nor emits.
    pub fn new(persistence: Arc<dyn TokenPersistence>, initial: Vec<Token>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let mut tokens: Vec<Token> = Vec::with_capacity(initial.len());
        for token in initial {
            upsert(&mut tokens, token);
        }
        let sessions = tokens.iter().map(derive_session).collect();
        Self {
            tokens,
            sessions,
            changes,
            persistence,
        }
    }

    /// The canonical tokens.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The current session snapshot.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Subscribes to session change events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionsChangeEvent> {
        self.changes.subscribe()
    }

    /// Looks up the token behind an access token.
    pub fn find_token(&self, access_token: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.access_token == access_token)
    }

    /// Applies a change and persists the resulting token list.
    ///
    /// Removals match by access token. Additions replace a token with the
    /// same access token or are appended. An empty change does nothing.
    pub fn update(&mut self, change: TokenChange) {
        if change.added.is_empty() && change.removed.is_empty() {
            return;
        }

        for removed in &change.removed {
            self.tokens.retain(|t| t.access_token != removed.access_token);
        }
        for added in change.added {
            upsert(&mut self.tokens, added);
        }

        tracing::trace!(tokens = self.tokens.len(), "Token store updated");
        self.recompute();

        if let Err(e) = self.persistence.set(&self.tokens) {
            tracing::error!(error = %e, "Failed to persist tokens");
        }
    }

    /// Replaces the token list with one observed in persistent storage,
    /// without writing it back.
    pub fn apply_persisted(&mut self, tokens: Vec<Token>) {
        self.tokens.clear();
        for token in tokens {
            upsert(&mut self.tokens, token);
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        let next: Vec<Session> = self.tokens.iter().map(derive_session).collect();
        if same_sessions(&self.sessions, &next) {
            self.sessions = next;
            return;
        }

        let event = if next.is_empty() {
            SessionsChangeEvent {
                removed: std::mem::take(&mut self.sessions),
                ..SessionsChangeEvent::default()
            }
        } else {
            let contains = |list: &[Session], s: &Session| {
                list.iter().any(|o| o.access_token == s.access_token)
            };
            SessionsChangeEvent {
                added: next
                    .iter()
                    .filter(|s| !contains(&self.sessions, s))
                    .cloned()
                    .collect(),
                removed: self
                    .sessions
                    .iter()
                    .filter(|s| !contains(&next, s))
                    .cloned()
                    .collect(),
                changed: Vec::new(),
            }
        };
        self.sessions = next;

        if event.added.is_empty() && event.removed.is_empty() {
            return;
        }
        tracing::debug!(
            added = event.added.len(),
            removed = event.removed.len(),
            "Sessions changed"
        );
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }
}

fn upsert(tokens: &mut Vec<Token>, token: Token) {
    match tokens
        .iter_mut()
        .find(|t| t.access_token == token.access_token)
    {
        Some(existing) => *existing = token,
        None => tokens.push(token),
    }
}

// ---------------------------------------------------------------------------
// Persistence backends
// ---------------------------------------------------------------------------

/// In-memory [`TokenPersistence`].
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    tokens: Mutex<Vec<Token>>,
}

impl MemoryPersistence {
    /// Creates a backend holding `tokens`.
    pub fn with_tokens(tokens: Vec<Token>) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

impl TokenPersistence for MemoryPersistence {
    fn set(&self, tokens: &[Token]) -> Result<()> {
        let mut guard = self
            .tokens
            .lock()
            .map_err(|_| AuthError::Config("token persistence lock poisoned".to_string()))?;
        *guard = tokens.to_vec();
        Ok(())
    }

    fn load(&self) -> Result<Vec<Token>> {
        let guard = self
            .tokens
            .lock()
            .map_err(|_| AuthError::Config("token persistence lock poisoned".to_string()))?;
        Ok(guard.clone())
    }
}

/// [`TokenPersistence`] backed by the OS keyring.
///
/// The token list is stored as one JSON blob per authorization server. The
/// client registration for the same server is stored in a sibling entry so
/// that refresh tokens stay usable across runs.
#[derive(Debug, Clone)]
pub struct KeyringPersistence {
    service: String,
    account: String,
}

impl KeyringPersistence {
    /// Creates a backend for `server_id` under the service prefix `service`.
    pub fn new(service: &str, server_id: &str) -> Self {
        Self {
            service: format!("{}-{}", service, server_id),
            account: server_id.to_string(),
        }
    }

    fn entry(&self, suffix: &str) -> Result<keyring::Entry> {
        let account = format!("{}{}", self.account, suffix);
        Ok(keyring::Entry::new(&self.service, &account).map_err(AuthError::Keyring)?)
    }

    fn read(&self, suffix: &str) -> Result<Option<String>> {
        match self.entry(suffix)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Keyring(e).into()),
        }
    }

    /// Stores the client registration for this server.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Keyring`] if the credential store rejects the
    /// write.
    pub fn save_client(&self, client: &ClientRegistration) -> Result<()> {
        let json = serde_json::to_string(client)?;
        self.entry("#client")?
            .set_password(&json)
            .map_err(AuthError::Keyring)?;
        Ok(())
    }

    /// Loads the stored client registration, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Keyring`] for credential store failures or
    /// [`AuthError::Serialization`] for a corrupt entry.
    pub fn load_client(&self) -> Result<Option<ClientRegistration>> {
        match self.read("#client")? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Deletes every entry for this server. Missing entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Keyring`] for credential store failures.
    pub fn clear(&self) -> Result<()> {
        for suffix in ["", "#client"] {
            match self.entry(suffix)?.delete_password() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(AuthError::Keyring(e).into()),
            }
        }
        Ok(())
    }
}

impl TokenPersistence for KeyringPersistence {
    fn set(&self, tokens: &[Token]) -> Result<()> {
        let json = serde_json::to_string(tokens)?;
        self.entry("")?
            .set_password(&json)
            .map_err(AuthError::Keyring)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<Token>> {
        match self.read("")? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }
}
