//! Realtime broker client for Wavelink
//!
//! Keeps an authenticated, multi-channel event feed alive over an
//! unreliable WebSocket transport and reconciles what it delivers with
//! paginated history the application already holds.
//!
//! The moving parts, leaves first:
//!
//! - [`ChannelAuthorizer`] signs private/presence subscriptions with the
//!   session bearer token
//! - [`ConnectionManager`] owns the socket and the reconnection state
//!   machine (exponential backoff, fresh socket id per connection)
//! - [`ChannelRegistry`] tracks desired vs. active subscriptions and
//!   re-subscribes everything after a reconnect
//! - [`SubscriptionSupervisor`] retries mandatory channels with a
//!   bounded budget and keeps them healthy afterwards
//! - [`EventDispatcher`] fans inbound events out to per-channel handler
//!   tables and a global listener set
//! - [`MessageTimeline`] merges live chat messages into paginated
//!   history without double-rendering optimistic sends
//!
//! Everything hangs off one [`RealtimeClient`] handle; instances are
//! independent, so tests build as many as they need.

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod session;
pub mod transport;

pub use auth::ChannelAuthorizer;
pub use channel::{ChannelInfo, ChannelKind, EventHandler, EventHandlers};
pub use client::RealtimeClient;
pub use config::{BrokerConfig, ReconnectPolicy, RetryPolicy};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use dispatch::{EventDispatcher, ListenerId};
pub use error::{AuthFailure, RealtimeError, RealtimeResult};
pub use protocol::{
    BrokerFrame, ClientFrame, EventEnvelope, PresenceMember, RawFrame, SubscriptionGrant,
};
pub use reconcile::{ChatMessage, MessageTimeline, DUPLICATE_WINDOW_MS};
pub use registry::{ChannelEvent, ChannelRegistry};
pub use retry::SubscriptionSupervisor;
pub use session::{SessionProvider, StaticSession};
pub use transport::{Transport, TransportCommand, TransportLink, WebSocketTransport};
