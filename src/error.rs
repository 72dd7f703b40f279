//! Error types for the dynamic OAuth provider
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling. Fallible functions return
//! [`Result`], an `anyhow` alias; callers that need to react to a specific
//! failure (cancellation, `invalid_client`) downcast to [`AuthError`].

use thiserror::Error;

/// Main error type for dynamic OAuth operations
///
/// Variants follow the failure taxonomy of the provider: transport errors,
/// structured OAuth protocol errors, shape errors for responses that parse
/// but fail validation, user cancellation, and configuration errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// A JWT did not have three segments or its header/payload were not JSON
    /// objects
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The authorization server does not advertise a required capability
    #[error("Unsupported by server: {0}")]
    UnsupportedByServer(String),

    /// Dynamic client registration was rejected by the server
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// A response parsed as JSON but did not have the expected shape
    #[error("Invalid server response: {0}")]
    InvalidServerResponse(String),

    /// Metadata discovery failed or the server misidentified itself
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Non-2xx HTTP response without a recognizable OAuth error body
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Raw response body text
        body: String,
    },

    /// Structured OAuth error response (RFC 6749 section 5.2, RFC 8628)
    #[error("OAuth error {error}: {}", .description.as_deref().unwrap_or("no description"))]
    OAuth {
        /// The `error` code
        error: String,
        /// The optional `error_description`
        description: Option<String>,
    },

    /// The authorization server no longer recognizes our client credentials
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    /// The device code expired before the user completed authorization
    #[error("Device code expired before authorization completed")]
    DeviceCodeExpired,

    /// The user (or a cancellation token) aborted the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The host could not open the authorization URL in a browser
    #[error("Failed to open browser: {0}")]
    BrowserOpen(String),

    /// A required endpoint is missing from the authorization server metadata
    #[error("Missing endpoint in server metadata: {0}")]
    MissingEndpoint(&'static str),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl AuthError {
    /// Maps an OAuth `error` code to the matching variant.
    ///
    /// `invalid_client` gets its own variant because it is the only protocol
    /// error that triggers corrective action (client re-registration).
    pub fn from_oauth(error: String, description: Option<String>) -> Self {
        if error == "invalid_client" {
            Self::InvalidClient(description.unwrap_or(error))
        } else {
            Self::OAuth { error, description }
        }
    }

    /// Returns `true` when `err` is (or wraps) a user cancellation.
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<AuthError>(), Some(AuthError::Cancelled(_)))
    }

    /// Returns `true` when `err` is (or wraps) an `invalid_client` response.
    pub fn is_invalid_client(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::InvalidClient(_))
        )
    }
}

/// Result type alias for dynamic OAuth operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
