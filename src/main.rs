//! mcp-auth - Dynamic OAuth 2.0 sign-in for remote MCP servers
//!
#![doc = "Main entry point for the mcp-auth command-line tool."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_dynamic_auth::cli::{Cli, Commands};
use mcp_dynamic_auth::commands;
use mcp_dynamic_auth::config::AuthConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/auth.yaml");
    let config = AuthConfig::load(config_path)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Discover { url, json } => {
            tracing::info!("Running discovery for {}", url);
            commands::discover::run_discover(url, json).await?;
            Ok(())
        }
        Commands::Login {
            url,
            scopes,
            remote,
        } => {
            tracing::info!("Starting sign-in for {}", url);
            if remote {
                tracing::debug!("Remote mode: loopback flow disabled");
            }
            commands::login::run_login(config, url, scopes, remote).await?;
            Ok(())
        }
        Commands::Sessions { url, scopes } => {
            commands::sessions::list_sessions(config, url, scopes).await?;
            Ok(())
        }
        Commands::Logout { url, session_id } => {
            tracing::info!("Removing session {}", session_id);
            commands::logout::run_logout(config, url, session_id).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over `--verbose`. Logs go to stderr so that command
/// output on stdout stays clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "mcp_dynamic_auth=debug"
    } else {
        "mcp_dynamic_auth=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
