//! Error types for the realtime client
//!
//! A single error hierarchy using thiserror, split into the channel
//! authorization failures (which carry their own reasons) and the
//! client-level taxonomy used by the subscription retry path.

use thiserror::Error;

/// Reasons a channel authorization attempt can fail
#[derive(Error, Debug)]
pub enum AuthFailure {
    /// No session token is available
    #[error("session token is missing")]
    MissingToken,

    /// The session token has expired
    #[error("session token is expired")]
    ExpiredToken,

    /// The authorization endpoint returned a non-success status
    #[error("authorization endpoint returned status {status}")]
    Denied { status: u16 },

    /// The endpoint answered 2xx but the body carried no auth signature
    #[error("authorization response is missing the auth signature")]
    MalformedGrant,

    /// The authorization request exceeded its bounded wait
    #[error("authorization request timed out")]
    Timeout,

    /// The HTTP request itself failed
    #[error("authorization request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Client-level errors
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Channel authorization failed (recoverable, retried by the orchestrator)
    #[error("channel authorization failed: {0}")]
    Auth(#[from] AuthFailure),

    /// A subscribe was attempted while the connection is not established
    #[error("transport is not ready")]
    TransportNotReady,

    /// The broker rejected a subscription after a grant was presented
    #[error("broker rejected subscription to {channel}: {message}")]
    Subscription { channel: String, message: String },

    /// The retry orchestrator exhausted its attempt budget for a channel
    #[error("gave up subscribing to {channel} after {attempts} attempts")]
    GaveUp { channel: String, attempts: u32 },

    /// The operation was interrupted by `disconnect()`
    #[error("operation cancelled by disconnect")]
    Cancelled,

    /// Socket-level transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid client configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A frame could not be encoded or decoded
    #[error("frame serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Check whether the subscription retry orchestrator should retry
    /// after this error.
    ///
    /// Auth failures, an unready transport, broker-side subscription
    /// rejections and socket-level failures are all transient from the
    /// orchestrator's point of view. `GaveUp` and `Cancelled` are
    /// terminal, and configuration or codec errors will not heal on
    /// their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RealtimeError::Auth(_)
                | RealtimeError::TransportNotReady
                | RealtimeError::Subscription { .. }
                | RealtimeError::Transport(_)
        )
    }
}

/// Result type for realtime client operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RealtimeError::Auth(AuthFailure::MissingToken).is_retryable());
        assert!(RealtimeError::TransportNotReady.is_retryable());
        assert!(RealtimeError::Subscription {
            channel: "private-x".into(),
            message: "denied".into(),
        }
        .is_retryable());
        assert!(RealtimeError::Transport("socket closed".into()).is_retryable());

        assert!(!RealtimeError::GaveUp {
            channel: "private-x".into(),
            attempts: 3,
        }
        .is_retryable());
        assert!(!RealtimeError::Cancelled.is_retryable());
        assert!(!RealtimeError::Config("bad url".into()).is_retryable());
    }

    #[test]
    fn test_auth_failure_display() {
        let err = RealtimeError::Auth(AuthFailure::Denied { status: 403 });
        assert_eq!(
            err.to_string(),
            "channel authorization failed: authorization endpoint returned status 403"
        );
    }
}
