//! Channel subscription registry
//!
//! Tracks desired vs. active subscriptions, owns every channel entry,
//! and re-issues subscriptions with fresh grants after a reconnect. The
//! channel map is mutated only here; the rest of the crate reads it
//! through snapshots and the dispatch lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::auth::ChannelAuthorizer;
use crate::channel::{ChannelEntry, ChannelInfo, ChannelKind, EventHandler, EventHandlers};
use crate::error::{RealtimeError, RealtimeResult};
use crate::protocol::PresenceMember;
use crate::transport::TransportCommand;

/// Capacity of the channel-event broadcast
const EVENT_CAPACITY: usize = 64;

/// Per-channel notifications for owners of mandatory subscriptions and
/// status UIs
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The broker confirmed a subscription
    Subscribed { channel: String },

    /// The channel was unsubscribed locally
    Unsubscribed { channel: String },

    /// A subscription attempt or re-authorization failed; the channel is
    /// inactive until somebody retries
    SubscriptionFailed { channel: String, reason: String },

    /// The retry orchestrator exhausted its budget for this channel
    GaveUp { channel: String, attempts: u32 },
}

#[derive(Clone)]
struct ActiveLink {
    socket_id: String,
    commands: mpsc::Sender<TransportCommand>,
}

/// Registry of channel subscriptions for one client instance
pub struct ChannelRegistry {
    channels: DashMap<String, ChannelEntry>,
    link: StdMutex<Option<ActiveLink>>,
    authorizer: ChannelAuthorizer,
    events: broadcast::Sender<ChannelEvent>,
    subscribe_timeout: Duration,

    /// Bumped on every disconnect; in-flight work compares its snapshot
    /// and discards its result when the epoch moved on.
    epoch: AtomicU64,
}

impl ChannelRegistry {
    pub(crate) fn new(authorizer: ChannelAuthorizer, subscribe_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            channels: DashMap::new(),
            link: StdMutex::new(None),
            authorizer,
            events,
            subscribe_timeout,
            epoch: AtomicU64::new(0),
        }
    }

    /// Subscribe to per-channel notifications
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Subscribe to a channel, waiting for the broker's confirmation.
    ///
    /// Idempotent: on an already-active channel the handler table is
    /// merged and no network subscribe is issued. Concurrent calls for
    /// the same name serialize on the entry's gate — the second call
    /// observes the first one's outcome.
    pub async fn subscribe(
        &self,
        name: &str,
        kind: ChannelKind,
        handlers: EventHandlers,
    ) -> RealtimeResult<ChannelInfo> {
        let epoch = self.epoch.load(Ordering::Acquire);

        let gate = {
            let entry = self
                .channels
                .entry(name.to_string())
                .or_insert_with(|| ChannelEntry::new(name, kind));
            if entry.kind != kind {
                warn!(
                    channel = %name,
                    held = %entry.kind,
                    requested = %kind,
                    "channel kind mismatch, keeping the original kind"
                );
            }
            entry.gate.clone()
        };
        let _guard = gate.lock().await;

        // Re-check under the gate: the first caller may have finished,
        // or a disconnect may have cleared the registry while we waited.
        if self.epoch.load(Ordering::Acquire) != epoch {
            return Err(RealtimeError::Cancelled);
        }
        {
            let mut entry = match self.channels.get_mut(name) {
                Some(entry) => entry,
                None => return Err(RealtimeError::Cancelled),
            };
            if entry.subscribed {
                entry.merge_handlers(handlers);
                return Ok(entry.snapshot());
            }
        }

        // The entry's kind wins over the caller's on a mismatch
        let kind = match self.channels.get(name) {
            Some(entry) => entry.kind,
            None => return Err(RealtimeError::Cancelled),
        };

        let link = self.link().ok_or(RealtimeError::TransportNotReady)?;

        let grant = if kind.requires_auth() {
            Some(self.authorizer.authorize(name, &link.socket_id).await?)
        } else {
            None
        };

        // Discard the in-flight result if a disconnect happened under
        // the authorize call, or the socket changed (the grant is stale).
        if self.epoch.load(Ordering::Acquire) != epoch {
            return Err(RealtimeError::Cancelled);
        }
        match self.link() {
            Some(current) if current.socket_id == link.socket_id => {}
            _ => return Err(RealtimeError::TransportNotReady),
        }

        let confirmation = {
            let mut entry = match self.channels.get_mut(name) {
                Some(entry) => entry,
                None => return Err(RealtimeError::Cancelled),
            };
            entry.merge_handlers(handlers);
            let (tx, rx) = oneshot::channel();
            entry.pending = Some(tx);
            rx
        };

        link.commands
            .send(TransportCommand::Subscribe {
                channel: name.to_string(),
                grant,
            })
            .await
            .map_err(|_| RealtimeError::TransportNotReady)?;
        debug!(channel = %name, kind = %kind, "subscribe issued");

        match timeout(self.subscribe_timeout, confirmation).await {
            Ok(Ok(Ok(()))) => {
                let entry = self.channels.get(name).ok_or(RealtimeError::Cancelled)?;
                Ok(entry.snapshot())
            }
            Ok(Ok(Err(e))) => Err(e),
            // Waiter dropped: detach or unsubscribe raced us
            Ok(Err(_)) => Err(RealtimeError::Cancelled),
            Err(_) => {
                if let Some(mut entry) = self.channels.get_mut(name) {
                    entry.pending = None;
                }
                Err(RealtimeError::Subscription {
                    channel: name.to_string(),
                    message: "confirmation timed out".to_string(),
                })
            }
        }
    }

    /// Drop a channel: handlers removed, transport told to leave.
    /// A no-op for names the registry does not hold.
    pub fn unsubscribe(&self, name: &str) {
        let Some((_, entry)) = self.channels.remove(name) else {
            trace!(channel = %name, "unsubscribe of unknown channel ignored");
            return;
        };
        if entry.subscribed {
            if let Some(link) = self.link() {
                let _ = link.commands.try_send(TransportCommand::Unsubscribe {
                    channel: name.to_string(),
                });
            }
        }
        debug!(channel = %name, "unsubscribed");
        self.emit(ChannelEvent::Unsubscribed {
            channel: name.to_string(),
        });
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Whether a channel is active (participates in dispatch)
    pub fn is_active(&self, name: &str) -> bool {
        self.channels
            .get(name)
            .map(|entry| entry.subscribed)
            .unwrap_or(false)
    }

    pub fn get_channel(&self, name: &str) -> Option<ChannelInfo> {
        self.channels.get(name).map(|entry| entry.snapshot())
    }

    /// Names of all currently active channels
    pub fn get_active_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|entry| entry.subscribed)
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Handler lookup for the dispatcher. `None` means the channel is
    /// unknown or inactive and the frame must be dropped; `Some(None)`
    /// means active but no handler bound for this event name.
    pub(crate) fn dispatch_target(
        &self,
        channel: &str,
        event: &str,
    ) -> Option<Option<EventHandler>> {
        let entry = self.channels.get(channel)?;
        if !entry.subscribed {
            return None;
        }
        Some(entry.handlers.get(event).cloned())
    }

    // =========================================================================
    // Broker-frame bookkeeping (called by the dispatcher)
    // =========================================================================

    pub(crate) fn confirm_subscribed(&self, channel: &str, members: Vec<PresenceMember>) {
        let Some(mut entry) = self.channels.get_mut(channel) else {
            trace!(channel = %channel, "confirmation for unknown channel ignored");
            return;
        };
        entry.subscribed = true;
        entry.subscribed_at = Some(chrono::Utc::now());
        if entry.kind == ChannelKind::Presence {
            entry.members = members.into_iter().map(|m| m.id).collect();
        }
        if let Some(waiter) = entry.pending.take() {
            let _ = waiter.send(Ok(()));
        }
        drop(entry);
        info!(channel = %channel, "subscription confirmed");
        self.emit(ChannelEvent::Subscribed {
            channel: channel.to_string(),
        });
    }

    pub(crate) fn confirm_error(&self, channel: &str, message: &str) {
        let Some(mut entry) = self.channels.get_mut(channel) else {
            trace!(channel = %channel, "error for unknown channel ignored");
            return;
        };
        entry.subscribed = false;
        entry.subscribed_at = None;
        if let Some(waiter) = entry.pending.take() {
            let _ = waiter.send(Err(RealtimeError::Subscription {
                channel: channel.to_string(),
                message: message.to_string(),
            }));
        }
        drop(entry);
        warn!(channel = %channel, message = %message, "subscription rejected by broker");
        self.emit(ChannelEvent::SubscriptionFailed {
            channel: channel.to_string(),
            reason: message.to_string(),
        });
    }

    pub(crate) fn member_added(&self, channel: &str, member: PresenceMember) {
        if let Some(mut entry) = self.channels.get_mut(channel) {
            if entry.kind == ChannelKind::Presence {
                debug!(channel = %channel, member = %member.id, "member added");
                entry.members.insert(member.id);
            }
        }
    }

    pub(crate) fn member_removed(&self, channel: &str, member_id: &str) {
        if let Some(mut entry) = self.channels.get_mut(channel) {
            if entry.kind == ChannelKind::Presence {
                debug!(channel = %channel, member = %member_id, "member removed");
                entry.members.remove(member_id);
            }
        }
    }

    pub(crate) fn emit_gave_up(&self, channel: &str, attempts: u32) {
        self.emit(ChannelEvent::GaveUp {
            channel: channel.to_string(),
            attempts,
        });
    }

    // =========================================================================
    // Connection lifecycle (called by the connection manager)
    // =========================================================================

    /// A new transport is up; subsequent subscribes go through it.
    pub(crate) fn attach(&self, socket_id: &str, commands: mpsc::Sender<TransportCommand>) {
        self.set_link(Some(ActiveLink {
            socket_id: socket_id.to_string(),
            commands,
        }));
    }

    /// The transport dropped: every channel goes inactive but stays
    /// desired, so the next `attach` can re-subscribe it.
    pub(crate) fn detach(&self) {
        self.set_link(None);
        for mut entry in self.channels.iter_mut() {
            entry.subscribed = false;
            entry.subscribed_at = None;
            entry.members.clear();
            // Dropping the waiter cancels any in-flight subscribe
            entry.pending = None;
        }
    }

    /// `disconnect()` semantics: forget everything and invalidate any
    /// in-flight authorize/subscribe results.
    pub(crate) fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::Release);
        self.set_link(None);
        self.channels.clear();
    }

    /// Re-issue a subscription for every desired channel over the
    /// current link, fetching fresh grants. Confirmations arrive as
    /// frames, so this only sends — it never waits for the broker.
    pub(crate) async fn resubscribe_all(&self) {
        let Some(link) = self.link() else { return };
        let epoch = self.epoch.load(Ordering::Acquire);
        let names: Vec<String> = self.channels.iter().map(|entry| entry.key().clone()).collect();
        if names.is_empty() {
            return;
        }
        info!(
            count = names.len(),
            socket_id = %link.socket_id,
            "re-subscribing channels"
        );

        for name in names {
            let Some(gate) = self.channels.get(&name).map(|entry| entry.gate.clone()) else {
                continue;
            };
            let _guard = gate.lock().await;
            if self.epoch.load(Ordering::Acquire) != epoch {
                return;
            }

            let (kind, already_subscribed) = match self.channels.get(&name) {
                Some(entry) => (entry.kind, entry.subscribed),
                None => continue,
            };
            if already_subscribed {
                continue;
            }

            let grant = if kind.requires_auth() {
                match self.authorizer.authorize(&name, &link.socket_id).await {
                    Ok(grant) => Some(grant),
                    Err(e) => {
                        warn!(channel = %name, error = %e, "re-authorization failed");
                        self.emit(ChannelEvent::SubscriptionFailed {
                            channel: name.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                }
            } else {
                None
            };

            if self.epoch.load(Ordering::Acquire) != epoch {
                return;
            }
            let command = TransportCommand::Subscribe {
                channel: name.clone(),
                grant,
            };
            if link.commands.send(command).await.is_err() {
                debug!("transport went away during re-subscription");
                return;
            }
        }
    }

    fn link(&self) -> Option<ActiveLink> {
        self.link.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_link(&self, link: Option<ActiveLink>) {
        if let Ok(mut guard) = self.link.lock() {
            *guard = link;
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.len())
            .field("active", &self.get_active_channels().len())
            .finish()
    }
}
