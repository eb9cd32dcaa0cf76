//! Client facade
//!
//! Wires the authorizer, registry, dispatcher, connection manager and
//! subscription supervisor into one handle the application owns. Every
//! instance is independent — tests build as many as they like.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::auth::ChannelAuthorizer;
use crate::channel::{ChannelInfo, ChannelKind, EventHandlers};
use crate::config::{BrokerConfig, RetryPolicy};
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::dispatch::{EventDispatcher, ListenerId};
use crate::error::RealtimeResult;
use crate::protocol::EventEnvelope;
use crate::registry::{ChannelEvent, ChannelRegistry};
use crate::retry::SubscriptionSupervisor;
use crate::session::SessionProvider;
use crate::transport::{Transport, WebSocketTransport};

/// The realtime client
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use wavelink_realtime_client::{
///     BrokerConfig, ChannelKind, EventHandlers, RealtimeClient, RetryPolicy, StaticSession,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BrokerConfig::new("wss://broker.wavelink.app/ws", "https://api.wavelink.app/broker/auth")?;
/// let session = Arc::new(StaticSession::new("bearer-token"));
/// let client = RealtimeClient::new(config, session)?;
///
/// client.connect()?;
/// client
///     .ensure_subscribed(
///         "private-agent-7",
///         ChannelKind::Private,
///         EventHandlers::new().on("notification.created", |event| {
///             println!("notification: {}", event.payload);
///         }),
///         RetryPolicy::default(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RealtimeClient {
    connection: ConnectionManager,
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<EventDispatcher>,
    supervisor: Arc<SubscriptionSupervisor>,
}

impl RealtimeClient {
    /// Build a client over the shipped WebSocket transport.
    pub fn new(config: BrokerConfig, session: Arc<dyn SessionProvider>) -> RealtimeResult<Self> {
        Self::with_transport(config, session, Arc::new(WebSocketTransport::new()))
    }

    /// Build a client over a custom transport (tests inject a scripted
    /// broker here).
    pub fn with_transport(
        config: BrokerConfig,
        session: Arc<dyn SessionProvider>,
        transport: Arc<dyn Transport>,
    ) -> RealtimeResult<Self> {
        let authorizer = ChannelAuthorizer::new(&config, session.clone())?;
        let registry = Arc::new(ChannelRegistry::new(authorizer, config.subscribe_timeout));
        let dispatcher = Arc::new(EventDispatcher::new(registry.clone()));
        let connection = ConnectionManager::new(
            config,
            session,
            transport,
            registry.clone(),
            dispatcher.clone(),
        );
        let supervisor = SubscriptionSupervisor::new(registry.clone(), connection.clone());

        Ok(Self {
            connection,
            registry,
            dispatcher,
            supervisor,
        })
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open the broker connection and keep it alive.
    pub fn connect(&self) -> RealtimeResult<()> {
        self.connection.connect()
    }

    /// Tear down the connection, all channels, and every pending retry
    /// or health-check timer.
    pub fn disconnect(&self) {
        self.supervisor.cancel_all();
        self.connection.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_changes()
    }

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.events()
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// One-shot subscribe; see [`ChannelRegistry::subscribe`] semantics.
    pub async fn subscribe(
        &self,
        channel: &str,
        kind: ChannelKind,
        handlers: EventHandlers,
    ) -> RealtimeResult<ChannelInfo> {
        self.registry.subscribe(channel, kind, handlers).await
    }

    /// Subscribe with a retry budget and a periodic health check; for
    /// channels the application cannot live without.
    pub async fn ensure_subscribed(
        &self,
        channel: &str,
        kind: ChannelKind,
        handlers: EventHandlers,
        policy: RetryPolicy,
    ) -> RealtimeResult<ChannelInfo> {
        self.supervisor
            .clone()
            .ensure_subscribed(channel, kind, handlers, policy)
            .await
    }

    /// Leave a channel and stop any health check supervising it.
    pub fn unsubscribe(&self, channel: &str) {
        self.supervisor.cancel(channel);
        self.registry.unsubscribe(channel);
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.registry.has_channel(channel)
    }

    pub fn get_channel(&self, channel: &str) -> Option<ChannelInfo> {
        self.registry.get_channel(channel)
    }

    pub fn get_active_channels(&self) -> Vec<String> {
        self.registry.get_active_channels()
    }

    pub fn channel_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.registry.events()
    }

    // =========================================================================
    // Global listeners
    // =========================================================================

    /// Observe every dispatched event across all channels.
    pub fn bind_global(
        &self,
        listener: impl Fn(&EventEnvelope) + Send + Sync + 'static,
    ) -> ListenerId {
        self.dispatcher.bind_global(listener)
    }

    pub fn unbind_global(&self, id: ListenerId) -> bool {
        self.dispatcher.unbind_global(id)
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.state())
            .field("active_channels", &self.get_active_channels())
            .finish()
    }
}
