//! Configuration management for the dynamic OAuth provider
//!
//! This module handles loading, parsing, validating, and applying
//! environment overrides to the provider configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Port the loopback flow binds by default so that the redirect URI stays
/// stable across runs.
pub const DEFAULT_LOOPBACK_PORT: u16 = 33418;

/// Configuration for dynamic client registration and the authentication
/// flows.
///
/// # Examples
///
/// ```
/// use mcp_dynamic_auth::config::AuthConfig;
///
/// let config = AuthConfig::default();
/// assert_eq!(config.loopback_port, 33418);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// `client_name` sent during dynamic client registration
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// `client_uri` sent during dynamic client registration
    #[serde(default = "default_client_uri")]
    pub client_uri: String,

    /// Port for the loopback redirect server
    #[serde(default = "default_loopback_port")]
    pub loopback_port: u16,

    /// Additional web redirect URIs registered alongside the loopback ones
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// URI scheme the host application handles for the URL-handler flow
    #[serde(default = "default_app_uri_scheme")]
    pub app_uri_scheme: String,

    /// Web redirect page that bounces to the app URI carried in `state`
    ///
    /// When unset the app URI itself is used as the `redirect_uri`.
    #[serde(default)]
    pub url_handler_redirect_uri: Option<String>,

    /// Seconds before expiry at which a token is refreshed
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,

    /// Device-code polling interval when the server does not send one
    #[serde(default = "default_device_poll_interval_secs")]
    pub device_poll_interval_secs: u64,

    /// Keyring service prefix used by keyring-backed token persistence
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
}

fn default_client_name() -> String {
    "MCP Client".to_string()
}

fn default_client_uri() -> String {
    "https://modelcontextprotocol.io".to_string()
}

fn default_loopback_port() -> u16 {
    DEFAULT_LOOPBACK_PORT
}

fn default_app_uri_scheme() -> String {
    "mcp-auth".to_string()
}

fn default_refresh_buffer_secs() -> u64 {
    300
}

fn default_device_poll_interval_secs() -> u64 {
    5
}

fn default_keyring_service() -> String {
    "mcp-dynamic-auth".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            client_uri: default_client_uri(),
            loopback_port: default_loopback_port(),
            redirect_uris: Vec::new(),
            app_uri_scheme: default_app_uri_scheme(),
            url_handler_redirect_uri: None,
            refresh_buffer_secs: default_refresh_buffer_secs(),
            device_poll_interval_secs: default_device_poll_interval_secs(),
            keyring_service: default_keyring_service(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from file with environment overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    /// Parses configuration from a YAML string.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| AuthError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml_str(&contents)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(client_name) = std::env::var("MCP_AUTH_CLIENT_NAME") {
            self.client_name = client_name;
        }

        if let Ok(client_uri) = std::env::var("MCP_AUTH_CLIENT_URI") {
            self.client_uri = client_uri;
        }

        if let Ok(port) = std::env::var("MCP_AUTH_LOOPBACK_PORT") {
            if let Ok(value) = port.parse() {
                self.loopback_port = value;
            } else {
                tracing::warn!("Invalid MCP_AUTH_LOOPBACK_PORT: {}", port);
            }
        }

        if let Ok(scheme) = std::env::var("MCP_AUTH_APP_URI_SCHEME") {
            self.app_uri_scheme = scheme;
        }

        if let Ok(redirect) = std::env::var("MCP_AUTH_URL_HANDLER_REDIRECT_URI") {
            tracing::debug!(redirect = %redirect, "Env override: MCP_AUTH_URL_HANDLER_REDIRECT_URI");
            self.url_handler_redirect_uri = Some(redirect);
        }

        if let Ok(buffer) = std::env::var("MCP_AUTH_REFRESH_BUFFER_SECS") {
            if let Ok(value) = buffer.parse() {
                self.refresh_buffer_secs = value;
            } else {
                tracing::warn!("Invalid MCP_AUTH_REFRESH_BUFFER_SECS: {}", buffer);
            }
        }

        if let Ok(service) = std::env::var("MCP_AUTH_KEYRING_SERVICE") {
            self.keyring_service = service;
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.client_name.trim().is_empty() {
            return Err(AuthError::Config("client_name cannot be empty".to_string()).into());
        }

        if self.loopback_port == 0 {
            return Err(AuthError::Config("loopback_port must be non-zero".to_string()).into());
        }

        if self.app_uri_scheme.trim().is_empty() {
            return Err(AuthError::Config("app_uri_scheme cannot be empty".to_string()).into());
        }

        if let Some(redirect) = &self.url_handler_redirect_uri {
            Url::parse(redirect).map_err(|e| {
                AuthError::Config(format!("invalid url_handler_redirect_uri '{redirect}': {e}"))
            })?;
        }

        Ok(())
    }

    /// Near-expiry window in milliseconds.
    pub fn refresh_buffer_ms(&self) -> i64 {
        i64::try_from(self.refresh_buffer_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = AuthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.refresh_buffer_secs, 300);
        assert_eq!(config.refresh_buffer_ms(), 300_000);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = AuthConfig::from_yaml_str("client_name: Test Client\n").unwrap();
        assert_eq!(config.client_name, "Test Client");
        assert_eq!(config.loopback_port, DEFAULT_LOOPBACK_PORT);
        assert_eq!(config.app_uri_scheme, "mcp-auth");
        assert!(config.url_handler_redirect_uri.is_none());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = AuthConfig::from_yaml_str("loopback_port: [not, a, port]").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_validate_rejects_empty_client_name() {
        let config = AuthConfig {
            client_name: "  ".to_string(),
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config = AuthConfig {
            loopback_port: 0,
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_redirect() {
        let config = AuthConfig {
            url_handler_redirect_uri: Some("not a url".to_string()),
            ..AuthConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("url_handler_redirect_uri"));
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let config = AuthConfig::load("/definitely/not/here/auth.yaml").unwrap();
        assert_eq!(config.client_name, default_client_name());
    }

    #[test]
    #[serial]
    fn test_load_reads_file_and_applies_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("auth.yaml");
        std::fs::write(&path, "client_name: From File\nloopback_port: 4000\n").unwrap();

        std::env::set_var("MCP_AUTH_LOOPBACK_PORT", "5000");
        let config = AuthConfig::load(path.to_str().unwrap()).unwrap();
        std::env::remove_var("MCP_AUTH_LOOPBACK_PORT");

        assert_eq!(config.client_name, "From File");
        assert_eq!(config.loopback_port, 5000);
    }

    #[test]
    #[serial]
    fn test_invalid_env_port_is_ignored() {
        std::env::set_var("MCP_AUTH_LOOPBACK_PORT", "not-a-port");
        let config = AuthConfig::load("/definitely/not/here/auth.yaml").unwrap();
        std::env::remove_var("MCP_AUTH_LOOPBACK_PORT");
        assert_eq!(config.loopback_port, DEFAULT_LOOPBACK_PORT);
    }
}
