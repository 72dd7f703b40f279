//! mcp-dynamic-auth - Dynamic OAuth 2.0 authentication for remote MCP servers
//!
//! This library obtains, caches, refreshes and presents bearer tokens for a
//! resource server whose authorization server is discovered at runtime,
//! without a pre-registered client.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: discovery, dynamic client registration, token store, flows and
//!   the `DynamicAuthProvider` session API
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`, `commands`, `terminal_host`: the `mcp-auth` command-line tool
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_dynamic_auth::auth::token_store::MemoryPersistence;
//! use mcp_dynamic_auth::auth::{DynamicAuthProvider, ProviderContext};
//! use mcp_dynamic_auth::{AuthConfig, TerminalHost};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AuthConfig::load("config/auth.yaml")?;
//!     config.validate()?;
//!
//!     let ctx = ProviderContext {
//!         http: reqwest::Client::new(),
//!         config: Arc::new(config),
//!         host: Arc::new(TerminalHost::default()),
//!         persistence: Arc::new(MemoryPersistence::default()),
//!     };
//!     let url = url::Url::parse("https://api.example.com/mcp")?;
//!     let mut provider = DynamicAuthProvider::discover(ctx, &url, None, None).await?;
//!     let session = provider
//!         .create_session(&["read".to_string()], &CancellationToken::new())
//!         .await?;
//!     println!("Bearer {}", session.access_token);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod terminal_host;

// Re-export commonly used types
pub use auth::{DynamicAuthProvider, Session};
pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use terminal_host::TerminalHost;
