//! Wire protocol for the broker connection
//!
//! Frames are JSON objects with an `event` name, an optional `channel`
//! and an event-specific `data` payload. Event names under the
//! `broker:` prefix are reserved for the protocol itself; everything
//! else is an application event and is dispatched to channel handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RealtimeResult;

/// Reserved protocol event names
pub mod reserved {
    /// First frame after connect; carries the socket id
    pub const CONNECTION_ESTABLISHED: &str = "broker:connection_established";
    /// Broker accepted a subscription; carries the presence member snapshot
    pub const SUBSCRIPTION_SUCCEEDED: &str = "broker:subscription_succeeded";
    /// Broker rejected a subscription
    pub const SUBSCRIPTION_ERROR: &str = "broker:subscription_error";
    /// A member joined a presence channel
    pub const MEMBER_ADDED: &str = "broker:member_added";
    /// A member left a presence channel
    pub const MEMBER_REMOVED: &str = "broker:member_removed";
    /// Keepalive reply
    pub const PONG: &str = "broker:pong";
}

// =============================================================================
// Client -> Broker Frames
// =============================================================================

/// Frames sent from the client to the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join a channel; private/presence channels carry the grant
    Subscribe(SubscribePayload),

    /// Leave a channel
    Unsubscribe(UnsubscribePayload),

    /// Keepalive
    Ping,
}

/// Payload for the subscribe frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub channel: String,

    /// Grant signature for private/presence channels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    /// Presence member info as issued by the authorization endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// Payload for the unsubscribe frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribePayload {
    pub channel: String,
}

impl ClientFrame {
    /// Build a subscribe frame, attaching the grant when one was issued
    pub fn subscribe(channel: impl Into<String>, grant: Option<&SubscriptionGrant>) -> Self {
        ClientFrame::Subscribe(SubscribePayload {
            channel: channel.into(),
            auth: grant.map(|g| g.auth.clone()),
            channel_data: grant.and_then(|g| g.channel_data.clone()),
        })
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        ClientFrame::Unsubscribe(UnsubscribePayload {
            channel: channel.into(),
        })
    }
}

// =============================================================================
// Broker -> Client Frames
// =============================================================================

/// Raw JSON shape of every broker frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,
}

/// A decoded broker frame
#[derive(Debug, Clone)]
pub enum BrokerFrame {
    /// The broker assigned a socket id to this connection
    Established { socket_id: String },

    /// A subscription was accepted; presence channels carry the initial
    /// member snapshot
    SubscriptionSucceeded {
        channel: String,
        members: Vec<PresenceMember>,
    },

    /// A subscription was rejected
    SubscriptionError { channel: String, message: String },

    /// Presence membership grew
    MemberAdded {
        channel: String,
        member: PresenceMember,
    },

    /// Presence membership shrank
    MemberRemoved { channel: String, member_id: String },

    /// Keepalive reply
    Pong,

    /// An application event on a subscribed channel
    Event(EventEnvelope),
}

#[derive(Debug, Clone, Deserialize)]
struct EstablishedData {
    socket_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SucceededData {
    #[serde(default)]
    members: Vec<PresenceMember>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MemberRemovedData {
    id: String,
}

impl BrokerFrame {
    /// Decode a text frame from the broker.
    ///
    /// Returns `Ok(None)` for frames that are well-formed but carry
    /// nothing to route: an unknown reserved event, or an application
    /// event with no channel.
    pub fn decode(text: &str) -> RealtimeResult<Option<BrokerFrame>> {
        let raw: RawFrame = serde_json::from_str(text)?;

        let frame = match raw.event.as_str() {
            reserved::CONNECTION_ESTABLISHED => {
                let data: EstablishedData = serde_json::from_value(raw.data)?;
                BrokerFrame::Established {
                    socket_id: data.socket_id,
                }
            }
            reserved::SUBSCRIPTION_SUCCEEDED => {
                let channel = match raw.channel {
                    Some(c) => c,
                    None => return Ok(None),
                };
                let data: SucceededData =
                    serde_json::from_value(raw.data).unwrap_or_default();
                BrokerFrame::SubscriptionSucceeded {
                    channel,
                    members: data.members,
                }
            }
            reserved::SUBSCRIPTION_ERROR => {
                let channel = match raw.channel {
                    Some(c) => c,
                    None => return Ok(None),
                };
                let data: ErrorData = serde_json::from_value(raw.data).unwrap_or(ErrorData {
                    message: "subscription rejected".to_string(),
                });
                BrokerFrame::SubscriptionError {
                    channel,
                    message: data.message,
                }
            }
            reserved::MEMBER_ADDED => {
                let channel = match raw.channel {
                    Some(c) => c,
                    None => return Ok(None),
                };
                let member: PresenceMember = serde_json::from_value(raw.data)?;
                BrokerFrame::MemberAdded { channel, member }
            }
            reserved::MEMBER_REMOVED => {
                let channel = match raw.channel {
                    Some(c) => c,
                    None => return Ok(None),
                };
                let data: MemberRemovedData = serde_json::from_value(raw.data)?;
                BrokerFrame::MemberRemoved {
                    channel,
                    member_id: data.id,
                }
            }
            reserved::PONG => BrokerFrame::Pong,
            other if other.starts_with("broker:") => return Ok(None),
            _ => match raw.channel {
                Some(channel) => BrokerFrame::Event(EventEnvelope {
                    channel,
                    event: raw.event,
                    payload: raw.data,
                    received_at: Utc::now(),
                }),
                None => return Ok(None),
            },
        };

        Ok(Some(frame))
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// One inbound application event, as handed to handlers
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// Channel the event arrived on
    pub channel: String,

    /// Application event name
    pub event: String,

    /// Event payload, untouched
    pub payload: serde_json::Value,

    /// When this client received the frame
    pub received_at: DateTime<Utc>,
}

/// A member of a presence channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    pub id: String,

    /// Advisory display info supplied by the authorization endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

/// A signed authorization artifact for one subscribe attempt.
///
/// Grants bind to a socket id, which changes on every reconnect — they
/// are consumed immediately and never cached.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionGrant {
    /// Opaque signature the broker verifies
    pub auth: String,

    /// Presence member info, passed through to the broker verbatim
    #[serde(default)]
    pub channel_data: Option<String>,
}
