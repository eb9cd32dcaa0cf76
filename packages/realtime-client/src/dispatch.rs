//! Event dispatch
//!
//! One typed routing function fans inbound frames out: reserved frames
//! update registry state, application events go to the channel's handler
//! table and then to the global listener set. Handlers run synchronously
//! on the connection driver task, so events on one channel are delivered
//! in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::channel::EventHandler;
use crate::protocol::{BrokerFrame, EventEnvelope};
use crate::registry::ChannelRegistry;

/// Handle for removing a global listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Routes inbound frames to registry bookkeeping and event handlers
pub struct EventDispatcher {
    registry: Arc<ChannelRegistry>,
    globals: Mutex<Vec<(u64, EventHandler)>>,
    next_listener: AtomicU64,
}

impl EventDispatcher {
    pub(crate) fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            registry,
            globals: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Register a listener that sees every dispatched event, whether or
    /// not a channel-specific handler exists for it.
    pub fn bind_global(
        &self,
        listener: impl Fn(&EventEnvelope) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut globals) = self.globals.lock() {
            globals.push((id, Arc::new(listener)));
        }
        ListenerId(id)
    }

    /// Remove a global listener. Returns false for an unknown id.
    pub fn unbind_global(&self, id: ListenerId) -> bool {
        match self.globals.lock() {
            Ok(mut globals) => {
                let before = globals.len();
                globals.retain(|(listener_id, _)| *listener_id != id.0);
                globals.len() != before
            }
            Err(_) => false,
        }
    }

    /// Route one inbound frame.
    pub(crate) fn route(&self, frame: BrokerFrame) {
        match frame {
            BrokerFrame::Established { socket_id } => {
                // The transport consumes this during its handshake
                debug!(socket_id = %socket_id, "unexpected established frame mid-stream");
            }
            BrokerFrame::SubscriptionSucceeded { channel, members } => {
                self.registry.confirm_subscribed(&channel, members);
            }
            BrokerFrame::SubscriptionError { channel, message } => {
                self.registry.confirm_error(&channel, &message);
            }
            BrokerFrame::MemberAdded { channel, member } => {
                self.registry.member_added(&channel, member);
            }
            BrokerFrame::MemberRemoved { channel, member_id } => {
                self.registry.member_removed(&channel, &member_id);
            }
            BrokerFrame::Pong => trace!("pong"),
            BrokerFrame::Event(envelope) => self.dispatch(&envelope),
        }
    }

    /// Deliver an application event: channel handler first, then every
    /// global listener. Frames for inactive channels are dropped — a
    /// stale frame after unsubscribe must invoke nothing.
    pub fn dispatch(&self, envelope: &EventEnvelope) {
        let Some(handler) = self
            .registry
            .dispatch_target(&envelope.channel, &envelope.event)
        else {
            trace!(
                channel = %envelope.channel,
                event = %envelope.event,
                "dropping event for inactive channel"
            );
            return;
        };

        if let Some(handler) = handler {
            handler(envelope);
        }

        let listeners: Vec<EventHandler> = match self.globals.lock() {
            Ok(globals) => globals.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(envelope);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let globals = self.globals.lock().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("EventDispatcher")
            .field("global_listeners", &globals)
            .finish()
    }
}
