//! Command-line interface definition for mcp-auth
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to inspect discovery, sign in, list and remove
//! sessions for an OAuth-protected MCP server.

use clap::{Parser, Subcommand};

/// mcp-auth - Dynamic OAuth 2.0 sign-in for remote MCP servers
///
/// Discovers the authorization server of a resource, registers a client
/// dynamically and acquires tokens through the browser or a device code.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/auth.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "MCP_AUTH_JSON_LOGS")]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcp-auth
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the discovered authorization setup of a resource server
    Discover {
        /// URL of the protected resource
        url: String,

        /// Print the metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sign in and store a new session
    Login {
        /// URL of the protected resource
        url: String,

        /// Scope to request (repeatable)
        #[arg(short, long = "scope")]
        scopes: Vec<String>,

        /// The browser runs on another machine; skip the loopback server
        #[arg(long)]
        remote: bool,
    },

    /// List stored sessions, refreshing expired ones
    Sessions {
        /// URL of the protected resource
        url: String,

        /// Only list sessions for exactly these scopes (repeatable)
        #[arg(short, long = "scope")]
        scopes: Vec<String>,
    },

    /// Remove a stored session
    Logout {
        /// URL of the protected resource
        url: String,

        /// Session identifier as printed by `sessions`
        session_id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
