//! PKCE S256 challenge generation
//!
//! Implements the Proof Key for Code Exchange extension (RFC 7636) used by
//! both redirect-based flows. The verifier is 64 lowercase hex characters
//! drawn from 32 random bytes, which sits inside the 43..=128 character
//! range the RFC allows and only uses unreserved characters.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use std::fmt::Write as _;

use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

/// A PKCE verifier and its derived `S256` challenge.
///
/// # Examples
///
/// ```
/// use mcp_dynamic_auth::auth::pkce::PkceChallenge;
///
/// let pkce = PkceChallenge::generate();
/// assert_eq!(pkce.verifier.len(), 64);
/// assert_eq!(pkce.method, "S256");
/// ```
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Sent to the token endpoint as `code_verifier`.
    pub verifier: String,

    /// `BASE64URL(SHA256(verifier))`, sent to the authorization endpoint as
    /// `code_challenge`.
    pub challenge: String,

    /// Always `"S256"`.
    pub method: &'static str,
}

impl PkceChallenge {
    /// Generates a fresh verifier/challenge pair.
    pub fn generate() -> Self {
        let verifier = random_hex(32);
        let challenge = s256_challenge(&verifier);
        Self {
            verifier,
            challenge,
            method: "S256",
        }
    }
}

/// Computes the `S256` code challenge for `verifier`.
pub fn s256_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Returns `len` cryptographically random bytes as lowercase hex.
///
/// Also used for the `state` nonce of the redirect flows.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(len * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
