//! Dynamic OAuth 2.0 authentication
//!
//! - `protocol`: wire types and stateless helpers (RFC 8414, 9728, 7591)
//! - `discovery`: metadata discovery from a `401` challenge
//! - `pkce`: PKCE S256 verifier/challenge generation
//! - `token_store`: canonical token set and the derived session list
//! - `flow`: loopback, URL-handler and device code acquisition flows
//! - `host`: capabilities the embedding application provides
//! - `provider`: the session API tying everything together

pub mod discovery;
pub mod flow;
pub mod host;
pub mod pkce;
pub mod protocol;
pub mod provider;
pub mod token_store;

pub use discovery::AuthMetadata;
pub use host::{AuthHost, TokenPersistence};
pub use provider::{DynamicAuthProvider, ProviderContext};
pub use token_store::{Session, Token, TokenStore};
