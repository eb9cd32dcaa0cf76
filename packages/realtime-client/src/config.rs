//! Client configuration
//!
//! Broker endpoints, timeouts and the two retry policies: the
//! transport-level reconnection backoff and the per-channel subscription
//! retry budget. Both budgets are deliberately separate — the broker
//! connection and a mandatory channel's subscription fail and recover
//! independently.

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{RealtimeError, RealtimeResult};

/// Default interval between keepalive pings on the WebSocket
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

/// Default bounded wait for a channel authorization call
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bounded wait for the broker's subscription confirmation
const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bounded wait for the broker's connection-established frame
const DEFAULT_ESTABLISHED_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable holding the broker WebSocket URL
const ENV_WS_URL: &str = "WAVELINK_WS_URL";

/// Environment variable holding the channel authorization endpoint
const ENV_AUTH_ENDPOINT: &str = "WAVELINK_AUTH_ENDPOINT";

/// Configuration for a broker connection
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// WebSocket URL of the broker (ws:// or wss://)
    pub websocket_url: Url,

    /// HTTP endpoint that signs private/presence channel subscriptions
    pub auth_endpoint: Url,

    /// Interval between keepalive pings
    pub ping_interval: Duration,

    /// Bounded wait for each authorization call
    pub auth_timeout: Duration,

    /// Bounded wait for a subscription confirmation from the broker
    pub subscribe_timeout: Duration,

    /// Bounded wait for the broker to assign a socket id after connect
    pub established_timeout: Duration,

    /// Transport-level reconnection backoff
    pub reconnect: ReconnectPolicy,
}

impl BrokerConfig {
    /// Create a configuration from the two endpoint URLs, with default
    /// timeouts and reconnection backoff.
    pub fn new(websocket_url: &str, auth_endpoint: &str) -> RealtimeResult<Self> {
        let websocket_url = Url::parse(websocket_url)
            .map_err(|e| RealtimeError::Config(format!("invalid websocket url: {}", e)))?;
        if !matches!(websocket_url.scheme(), "ws" | "wss") {
            return Err(RealtimeError::Config(format!(
                "websocket url must use ws or wss, got {}",
                websocket_url.scheme()
            )));
        }

        let auth_endpoint = Url::parse(auth_endpoint)
            .map_err(|e| RealtimeError::Config(format!("invalid auth endpoint: {}", e)))?;
        if !matches!(auth_endpoint.scheme(), "http" | "https") {
            return Err(RealtimeError::Config(format!(
                "auth endpoint must use http or https, got {}",
                auth_endpoint.scheme()
            )));
        }

        Ok(Self {
            websocket_url,
            auth_endpoint,
            ping_interval: DEFAULT_PING_INTERVAL,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            established_timeout: DEFAULT_ESTABLISHED_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Load configuration from `WAVELINK_WS_URL` and
    /// `WAVELINK_AUTH_ENDPOINT`.
    pub fn from_env() -> RealtimeResult<Self> {
        let ws = env::var(ENV_WS_URL)
            .map_err(|_| RealtimeError::Config(format!("{} is not set", ENV_WS_URL)))?;
        let auth = env::var(ENV_AUTH_ENDPOINT)
            .map_err(|_| RealtimeError::Config(format!("{} is not set", ENV_AUTH_ENDPOINT)))?;
        Self::new(&ws, &auth)
    }
}

/// Exponential backoff for transport-level reconnection.
///
/// `delay_for(attempt)` grows by `growth_factor` per failed attempt and
/// is clamped to `[min_delay, max_delay]`. The attempt counter is owned
/// by the Connection Manager and resets to zero on every successful
/// connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub growth_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            growth_factor: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let min_ms = self.min_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let raw = min_ms * self.growth_factor.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(raw.clamp(min_ms, max_ms) as u64)
    }
}

/// Retry budget for a mandatory channel subscription
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before resolving `GaveUp`
    pub max_attempts: u32,

    /// Delay after the first failure; doubles per attempt
    pub base_delay: Duration,

    /// Upper bound on the per-attempt delay
    pub max_delay: Duration,

    /// Interval of the post-success health check that re-subscribes a
    /// silently dropped channel
    pub health_check_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based):
    /// `min(base_delay * 2^(attempt-1), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let raw = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        raw.min(self.max_delay)
    }
}
