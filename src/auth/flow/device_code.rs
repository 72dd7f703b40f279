//! Device authorization grant (RFC 8628)
//!
//! Requests a device code, shows the user code through the host and polls
//! the token endpoint until the user approves, the code expires, or the run
//! is cancelled.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{cancellable, AuthFlow, FlowContext};
use crate::auth::protocol::{
    error_from_response, is_device_authorization_response, is_oauth_error_response,
    is_token_response, parse_guarded, DeviceAuthorizationResponse, OAuthErrorResponse,
    TokenResponse, GRANT_TYPE_DEVICE_CODE,
};
use crate::error::{AuthError, Result};

const MIN_POLL_INTERVAL_SECS: u64 = 1;

/// Outcome of a single token poll.
#[derive(Debug)]
enum Poll {
    Pending,
    SlowDown,
    Complete(TokenResponse),
}

/// RFC 8628 device code flow.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceCodeFlow;

#[async_trait]
impl AuthFlow for DeviceCodeFlow {
    fn label(&self) -> &str {
        "device code"
    }

    async fn run(
        &self,
        ctx: &FlowContext<'_>,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> Result<TokenResponse> {
        let device_endpoint = ctx
            .server_metadata
            .device_authorization_endpoint
            .as_deref()
            .ok_or(AuthError::MissingEndpoint("device_authorization_endpoint"))?;
        let token_endpoint = ctx
            .server_metadata
            .token_endpoint
            .as_deref()
            .ok_or(AuthError::MissingEndpoint("token_endpoint"))?;

        let device = request_device_code(ctx, device_endpoint, scopes).await?;
        let issued_at = Instant::now();

        if !ctx
            .host
            .show_device_code_modal(&device.user_code, &device.verification_uri)
            .await
        {
            return Err(AuthError::Cancelled("device code sign-in dismissed".to_string()).into());
        }
        if !ctx.host.open_external_uri(&device.verification_uri).await {
            tracing::debug!(uri = %device.verification_uri, "Could not open verification URI");
        }

        let interval = poll_interval(device.interval, ctx.config.device_poll_interval_secs);
        let deadline = issued_at + Duration::from_secs(device.expires_in);

        while Instant::now() < deadline {
            sleep_or_cancel(cancel, interval).await?;

            match poll_token(ctx, token_endpoint, &device.device_code).await? {
                Poll::Complete(token) => {
                    tracing::info!("Device code sign-in completed");
                    return Ok(token);
                }
                Poll::Pending => {
                    tracing::debug!("authorization_pending; continuing to poll");
                }
                Poll::SlowDown => {
                    tracing::debug!("slow_down received; backing off an extra interval");
                    sleep_or_cancel(cancel, interval).await?;
                }
            }
        }

        Err(AuthError::DeviceCodeExpired.into())
    }
}

/// Polling interval: the server's value, else the configured one. Zero is
/// treated as unset and the result is never below one second.
fn poll_interval(server_secs: Option<u64>, configured_secs: u64) -> Duration {
    let secs = server_secs.filter(|&s| s > 0).unwrap_or(configured_secs);
    Duration::from_secs(secs.max(MIN_POLL_INTERVAL_SECS))
}

async fn sleep_or_cancel(cancel: &CancellationToken, interval: Duration) -> Result<()> {
    cancellable(cancel, "device code sign-in", async {
        tokio::time::sleep(interval).await;
        Ok::<(), anyhow::Error>(())
    })
    .await
}

async fn request_device_code(
    ctx: &FlowContext<'_>,
    endpoint: &str,
    scopes: &[String],
) -> Result<DeviceAuthorizationResponse> {
    let scope = scopes.join(" ");
    let mut form = vec![("client_id", ctx.client.client_id.as_str())];
    if !scope.is_empty() {
        form.push(("scope", scope.as_str()));
    }
    if let Some(resource) = ctx.resource {
        form.push(("resource", resource));
    }

    let resp = ctx
        .http
        .post(endpoint)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(error_from_response(resp).await.into());
    }

    let value: serde_json::Value = resp.json().await?;
    if !is_device_authorization_response(&value) {
        return Err(AuthError::InvalidServerResponse(format!(
            "invalid device authorization response: {value}"
        ))
        .into());
    }
    parse_guarded(value, "device authorization response")
}

async fn poll_token(ctx: &FlowContext<'_>, endpoint: &str, device_code: &str) -> Result<Poll> {
    let mut form = vec![
        ("grant_type", GRANT_TYPE_DEVICE_CODE),
        ("device_code", device_code),
        ("client_id", ctx.client.client_id.as_str()),
    ];
    if let Some(secret) = ctx.client.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    if let Some(resource) = ctx.resource {
        form.push(("resource", resource));
    }

    let resp = ctx
        .http
        .post(endpoint)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await?;
    let status = resp.status();
    let text = resp.text().await?;

    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) if !status.is_success() => {
            return Err(AuthError::Http {
                status: status.as_u16(),
                body: text,
            }
            .into())
        }
        Err(e) => {
            return Err(
                AuthError::InvalidServerResponse(format!("token poll is not JSON: {e}")).into(),
            )
        }
    };

    // Some servers answer pending polls with 200 and an error body.
    if is_oauth_error_response(&value) {
        let err: OAuthErrorResponse = parse_guarded(value, "token error response")?;
        return match err.error.as_str() {
            "authorization_pending" => Ok(Poll::Pending),
            "slow_down" => Ok(Poll::SlowDown),
            "expired_token" => Err(AuthError::DeviceCodeExpired.into()),
            "access_denied" => Err(AuthError::Cancelled(
                err.error_description
                    .unwrap_or_else(|| "authorization was denied".to_string()),
            )
            .into()),
            _ => Err(AuthError::from_oauth(err.error, err.error_description).into()),
        };
    }

    if !status.is_success() {
        return Err(AuthError::Http {
            status: status.as_u16(),
            body: text,
        }
        .into());
    }

    if !is_token_response(&value) {
        return Err(
            AuthError::InvalidServerResponse(format!("invalid token response: {value}")).into(),
        );
    }
    Ok(Poll::Complete(parse_guarded(value, "token response")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_prefers_server_value() {
        assert_eq!(poll_interval(Some(7), 5), Duration::from_secs(7));
        assert_eq!(poll_interval(None, 5), Duration::from_secs(5));
    }

    #[test]
    fn test_poll_interval_zero_falls_back_to_configured() {
        assert_eq!(poll_interval(Some(0), 5), Duration::from_secs(5));
    }

    #[test]
    fn test_poll_interval_has_floor() {
        assert_eq!(poll_interval(Some(0), 0), Duration::from_secs(1));
        assert_eq!(poll_interval(None, 0), Duration::from_secs(1));
    }
}
