//! Connection lifecycle management
//!
//! One driver task per `connect()` session owns the transport and walks
//! the state machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --established--> Connected
//!     Connected --drop--> Unavailable --backoff--> Connecting ...
//!     any state --disconnect()--> Disconnected
//! ```
//!
//! Reconnection is automatic while a session token is held. The driver
//! never caps its own attempts — abandoning reconnection is the retry
//! orchestrator's call, made when a mandatory channel exhausts its own
//! budget.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::dispatch::EventDispatcher;
use crate::error::{AuthFailure, RealtimeResult};
use crate::registry::ChannelRegistry;
use crate::session::SessionProvider;
use crate::transport::{Transport, TransportCommand};

/// Capacity of the lifecycle-event broadcast
const EVENT_CAPACITY: usize = 64;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Transport lost; automatic reconnection in progress
    Unavailable,
    /// Reconnection stopped without an explicit disconnect
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Unavailable => write!(f, "unavailable"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle events, observed via `events()`
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connecting,
    Connected { socket_id: String },
    Disconnected,
    Error { detail: String },
    Unavailable,
    Failed,
}

/// Owns the transport and the connection state machine
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: BrokerConfig,
    session: Arc<dyn SessionProvider>,
    transport: Arc<dyn Transport>,
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<EventDispatcher>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,

    /// Per-session shutdown signal; replaced on every `connect()`
    shutdown: Mutex<watch::Sender<bool>>,

    /// Set by the retry orchestrator on mandatory-channel exhaustion
    abandoned: AtomicBool,

    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: BrokerConfig,
        session: Arc<dyn SessionProvider>,
        transport: Arc<dyn Transport>,
        registry: Arc<ChannelRegistry>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                session,
                transport,
                registry,
                dispatcher,
                state,
                events,
                shutdown: Mutex::new(shutdown),
                abandoned: AtomicBool::new(false),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Open the connection and keep it alive.
    ///
    /// A no-op (with a warning) while already Connecting or Connected.
    /// From Unavailable/Failed this replaces the automatic loop with a
    /// fresh session and a fresh backoff budget.
    pub fn connect(&self) -> RealtimeResult<()> {
        match self.state() {
            state @ (ConnectionState::Connecting | ConnectionState::Connected) => {
                warn!(state = %state, "connect() ignored, already in progress");
                return Ok(());
            }
            _ => {}
        }

        if self.inner.session.current_token().is_none() {
            return Err(AuthFailure::MissingToken.into());
        }

        // Tear down any stale driver from a previous session
        self.stop_driver();
        self.inner.abandoned.store(false, Ordering::Release);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if let Ok(mut guard) = self.inner.shutdown.lock() {
            *guard = shutdown_tx;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            drive(inner, shutdown_rx).await;
        });
        if let Ok(mut guard) = self.inner.driver.lock() {
            *guard = Some(handle);
        }
        Ok(())
    }

    /// Tear everything down: transport, channels, pending timers.
    /// Always safe to call.
    pub fn disconnect(&self) {
        // Signal first so backoff and health-check timers cancel, then
        // drop the driver and forget every channel.
        if let Ok(guard) = self.inner.shutdown.lock() {
            let _ = guard.send(true);
        }
        self.stop_driver();
        self.inner.registry.clear();
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.emit(ConnectionEvent::Disconnected);
        info!("disconnected");
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch every state transition
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to lifecycle events
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// The current session's shutdown signal. Flips to true on
    /// `disconnect()`; backoff and health-check timers select on it.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        match self.inner.shutdown.lock() {
            Ok(guard) => guard.subscribe(),
            Err(poisoned) => poisoned.into_inner().subscribe(),
        }
    }

    /// Stop reconnecting after the current session drops, leaving the
    /// state `Failed`. Called when a mandatory channel exhausts its
    /// subscription budget — the transport budget is unlimited, the
    /// channel budget is not.
    pub fn abandon_reconnect(&self) {
        warn!("reconnection abandoned by subscription orchestrator");
        self.inner.abandoned.store(true, Ordering::Release);
    }

    fn stop_driver(&self) {
        if let Ok(mut guard) = self.inner.driver.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

/// The per-session driver: connect, pump frames, back off, repeat.
async fn drive(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        inner.set_state(ConnectionState::Connecting);
        inner.emit(ConnectionEvent::Connecting);

        let opened = tokio::select! {
            result = inner.transport.open(&inner.config) => result,
            _ = shutdown.changed() => return,
        };

        match opened {
            Ok(mut link) => {
                attempt = 0;
                info!(socket_id = %link.socket_id, "connected");
                inner.registry.attach(&link.socket_id, link.commands.clone());
                inner.set_state(ConnectionState::Connected);
                inner.emit(ConnectionEvent::Connected {
                    socket_id: link.socket_id.clone(),
                });

                // Re-issue subscriptions off the driver task so the frame
                // pump below can deliver their confirmations.
                {
                    let registry = inner.registry.clone();
                    tokio::spawn(async move {
                        registry.resubscribe_all().await;
                    });
                }

                let transport_dropped = loop {
                    tokio::select! {
                        frame = link.frames.recv() => match frame {
                            Some(frame) => inner.dispatcher.route(frame),
                            None => break true,
                        },
                        _ = shutdown.changed() => break false,
                    }
                };

                inner.registry.detach();

                if !transport_dropped {
                    // disconnect() owns the state transition
                    let _ = link.commands.send(TransportCommand::Close).await;
                    return;
                }

                warn!("transport connection lost");
                inner.emit(ConnectionEvent::Error {
                    detail: "transport connection lost".to_string(),
                });
            }
            Err(e) => {
                warn!(error = %e, "connect attempt failed");
                inner.emit(ConnectionEvent::Error {
                    detail: e.to_string(),
                });
            }
        }

        if *shutdown.borrow() {
            return;
        }
        if inner.abandoned.load(Ordering::Acquire) {
            inner.set_state(ConnectionState::Failed);
            inner.emit(ConnectionEvent::Failed);
            return;
        }
        if inner.session.current_token().is_none() {
            warn!("no session token held, reconnection stopped");
            inner.set_state(ConnectionState::Failed);
            inner.emit(ConnectionEvent::Failed);
            return;
        }

        inner.set_state(ConnectionState::Unavailable);
        inner.emit(ConnectionEvent::Unavailable);

        attempt += 1;
        let delay = inner.config.reconnect.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
        if inner.abandoned.load(Ordering::Acquire) {
            inner.set_state(ConnectionState::Failed);
            inner.emit(ConnectionEvent::Failed);
            return;
        }
    }
}
