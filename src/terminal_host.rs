//! Terminal implementation of [`AuthHost`]
//!
//! Prints URLs and prompts to stderr and reads answers from stdin. App URIs
//! are not supported, so the URL-handler flow fails fast and the provider
//! moves on to the next flow.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;

use crate::auth::host::AuthHost;
use crate::auth::protocol::ClientRegistration;
use crate::error::{AuthError, Result};

/// [`AuthHost`] for the `mcp-auth` command-line tool.
#[derive(Debug, Default, Clone)]
pub struct TerminalHost {
    /// Set when the browser cannot reach this machine (SSH sessions and the
    /// like); disables the loopback flow.
    pub remote: bool,
}

impl TerminalHost {
    /// Creates a terminal host.
    pub fn new(remote: bool) -> Self {
        Self { remote }
    }
}

/// Prints `prompt` and reads one trimmed line from stdin.
async fn read_line(prompt: String) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{}", prompt);
        let _ = stderr.flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    })
    .await
    .ok()
    .flatten()
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}

fn spawn_browser(url: &str) -> bool {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn().is_ok()
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn().is_ok()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = url;
        false
    }
}

#[async_trait]
impl AuthHost for TerminalHost {
    async fn open_external_uri(&self, uri: &str) -> bool {
        eprintln!("Open the following URL in your browser:\n\n  {}\n", uri);
        // The printed URL counts as opened.
        if !self.remote && !spawn_browser(uri) {
            tracing::debug!("No browser launcher available");
        }
        true
    }

    async fn create_app_uri(&self, _callback_uri: &str) -> Result<String> {
        Err(AuthError::Config("the terminal cannot handle app URIs".to_string()).into())
    }

    async fn wait_for_uri_handler(&self, _expected_uri: &str) -> Result<String> {
        Err(AuthError::Config("the terminal cannot handle app URIs".to_string()).into())
    }

    async fn prompt_for_client_registration(
        &self,
        server_url: &str,
    ) -> Option<ClientRegistration> {
        eprintln!(
            "Dynamic client registration is not supported by {}.",
            server_url
        );
        let client_id = read_line("Client ID (leave empty to cancel): ".to_string()).await?;
        if client_id.is_empty() {
            return None;
        }
        let client_secret = read_line("Client secret (optional): ".to_string())
            .await
            .filter(|s| !s.is_empty());
        Some(ClientRegistration {
            client_id,
            client_secret,
        })
    }

    async fn show_continue_notification(&self, message: &str) -> bool {
        read_line(format!("{} [y/N] ", message))
            .await
            .is_some_and(|answer| is_yes(&answer))
    }

    async fn show_device_code_modal(&self, user_code: &str, verification_uri: &str) -> bool {
        eprintln!(
            "\nTo sign in, visit {} and enter the code:\n\n  {}\n",
            verification_uri, user_code
        );
        true
    }

    fn report_progress(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn is_remote(&self) -> bool {
        self.remote
    }
}
