//! Channel authorization client
//!
//! Private and presence channel subscriptions must be signed by the
//! application backend. For each attempt the authorizer POSTs
//! `{channel_name, socket_id}` with the session bearer token and gets
//! back a grant. Grants bind to the socket id, so there is no caching:
//! every reconnect invalidates everything issued before it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::BrokerConfig;
use crate::error::{AuthFailure, RealtimeError, RealtimeResult};
use crate::protocol::SubscriptionGrant;
use crate::session::SessionProvider;

/// Connect timeout for the authorization endpoint
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Request body for the authorization endpoint (wire contract)
#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    channel_name: &'a str,
    socket_id: &'a str,
}

/// Client for the channel authorization endpoint
#[derive(Clone)]
pub struct ChannelAuthorizer {
    http: Client,
    endpoint: Url,
    session: Arc<dyn SessionProvider>,
}

impl fmt::Debug for ChannelAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAuthorizer")
            .field("endpoint", &self.endpoint.as_str())
            .field("session", &"[REDACTED]")
            .finish()
    }
}

impl ChannelAuthorizer {
    pub fn new(
        config: &BrokerConfig,
        session: Arc<dyn SessionProvider>,
    ) -> RealtimeResult<Self> {
        let http = Client::builder()
            .timeout(config.auth_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent("Wavelink/0.1")
            .build()
            .map_err(|e| RealtimeError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.auth_endpoint.clone(),
            session,
        })
    }

    /// Request a grant for one subscribe attempt.
    ///
    /// Called exactly once per attempt; the grant is consumed by the
    /// subscribe frame and discarded.
    pub async fn authorize(
        &self,
        channel_name: &str,
        socket_id: &str,
    ) -> Result<SubscriptionGrant, AuthFailure> {
        let token = self
            .session
            .current_token()
            .ok_or(AuthFailure::MissingToken)?;
        if self.session.is_expired() {
            return Err(AuthFailure::ExpiredToken);
        }

        let body = AuthRequest {
            channel_name,
            socket_id,
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthFailure::Timeout
                } else {
                    AuthFailure::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                channel = %channel_name,
                status = status.as_u16(),
                "channel authorization denied"
            );
            return Err(AuthFailure::Denied {
                status: status.as_u16(),
            });
        }

        let value: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AuthFailure::Timeout
            } else {
                AuthFailure::Http(e)
            }
        })?;

        let grant = parse_grant(&value).ok_or(AuthFailure::MalformedGrant)?;
        debug!(channel = %channel_name, socket_id = %socket_id, "channel authorized");
        Ok(grant)
    }
}

/// Extract a grant from the response body.
///
/// Accepts either the bare grant object or an envelope carrying it under
/// `data` (some backends wrap every response in `{code, data}`).
fn parse_grant(value: &serde_json::Value) -> Option<SubscriptionGrant> {
    let body = if value.get("auth").is_some() {
        value
    } else {
        value.get("data")?
    };

    let auth = body.get("auth")?.as_str()?.to_string();
    let channel_data = body.get("channel_data").and_then(|v| match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    });

    Some(SubscriptionGrant { auth, channel_data })
}
