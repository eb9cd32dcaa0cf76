//! Mandatory-channel subscription supervision
//!
//! Some channels are essential — the per-agent notification feed, the
//! open chatroom — and "try once" is not good enough for them.
//! `ensure_subscribed` retries with bounded exponential backoff, and
//! once subscribed it keeps a periodic health check alive that
//! re-subscribes the channel if the broker silently dropped it without
//! the transport noticing.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, warn};

use crate::channel::{ChannelInfo, ChannelKind, EventHandlers};
use crate::config::RetryPolicy;
use crate::connection::ConnectionManager;
use crate::error::{RealtimeError, RealtimeResult};
use crate::registry::ChannelRegistry;

/// Supervises mandatory channel subscriptions
pub struct SubscriptionSupervisor {
    registry: Arc<ChannelRegistry>,
    connection: ConnectionManager,
    health_tasks: DashMap<String, JoinHandle<()>>,
}

impl SubscriptionSupervisor {
    pub(crate) fn new(registry: Arc<ChannelRegistry>, connection: ConnectionManager) -> Arc<Self> {
        Arc::new(Self {
            registry,
            connection,
            health_tasks: DashMap::new(),
        })
    }

    /// Subscribe with a bounded retry budget, then keep the channel
    /// healthy with a periodic re-subscription check.
    ///
    /// Resolves `GaveUp` after `policy.max_attempts` consecutive
    /// failures — fatal for this channel until an explicit re-trigger,
    /// never fatal for the process. Resolves `Cancelled` when a
    /// `disconnect()` interrupts a pending wait.
    pub async fn ensure_subscribed(
        self: Arc<Self>,
        channel: &str,
        kind: ChannelKind,
        handlers: EventHandlers,
        policy: RetryPolicy,
    ) -> RealtimeResult<ChannelInfo> {
        let info = self
            .subscribe_with_retry(channel, kind, handlers.clone(), &policy)
            .await?;
        let supervisor = Arc::downgrade(&self);
        self.spawn_health_check(supervisor, channel, kind, handlers, policy);
        Ok(info)
    }

    /// Stop the health check for one channel (e.g. the caller
    /// unsubscribed it on purpose).
    pub fn cancel(&self, channel: &str) {
        if let Some((_, handle)) = self.health_tasks.remove(channel) {
            handle.abort();
            debug!(channel = %channel, "health check cancelled");
        }
    }

    /// Stop every health check. Called on `disconnect()`.
    pub fn cancel_all(&self) {
        for entry in self.health_tasks.iter() {
            entry.value().abort();
        }
        self.health_tasks.clear();
    }

    async fn subscribe_with_retry(
        &self,
        channel: &str,
        kind: ChannelKind,
        handlers: EventHandlers,
        policy: &RetryPolicy,
    ) -> RealtimeResult<ChannelInfo> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self
                .registry
                .subscribe(channel, kind, handlers.clone())
                .await
            {
                Ok(info) => return Ok(info),
                Err(e @ RealtimeError::Cancelled) => return Err(e),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt >= policy.max_attempts {
                        warn!(
                            channel = %channel,
                            attempts = attempt,
                            error = %e,
                            "subscription budget exhausted, giving up"
                        );
                        self.registry.emit_gave_up(channel, attempt);
                        self.connection.abandon_reconnect();
                        return Err(RealtimeError::GaveUp {
                            channel: channel.to_string(),
                            attempts: attempt,
                        });
                    }

                    let delay = policy.delay_for(attempt);
                    warn!(
                        channel = %channel,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "subscription attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = wait_for_shutdown(&self.connection) => {
                            return Err(RealtimeError::Cancelled);
                        }
                    }
                }
            }
        }
    }

    fn spawn_health_check(
        &self,
        supervisor: Weak<Self>,
        channel: &str,
        kind: ChannelKind,
        handlers: EventHandlers,
        policy: RetryPolicy,
    ) {
        // One health check per channel name; re-ensuring replaces it
        self.cancel(channel);

        let connection = self.connection.clone();
        let registry = self.registry.clone();
        let channel_name = channel.to_string();
        let handle = tokio::spawn(async move {
            run_health_check(
                supervisor,
                connection,
                registry,
                channel_name,
                kind,
                handlers,
                policy,
            )
            .await;
        });
        self.health_tasks.insert(channel.to_string(), handle);
    }
}

impl std::fmt::Debug for SubscriptionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSupervisor")
            .field("health_tasks", &self.health_tasks.len())
            .finish()
    }
}

async fn run_health_check(
    supervisor: Weak<SubscriptionSupervisor>,
    connection: ConnectionManager,
    registry: Arc<ChannelRegistry>,
    channel: String,
    kind: ChannelKind,
    handlers: EventHandlers,
    policy: RetryPolicy,
) {
    let mut ticker = interval(policy.health_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // interval fires immediately; the subscription was just confirmed
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if registry.is_active(&channel) {
                    continue;
                }
                let Some(supervisor) = supervisor.upgrade() else { return };
                warn!(channel = %channel, "mandatory channel inactive, re-subscribing");
                match supervisor
                    .subscribe_with_retry(&channel, kind, handlers.clone(), &policy)
                    .await
                {
                    Ok(_) => debug!(channel = %channel, "mandatory channel restored"),
                    Err(RealtimeError::Cancelled) => return,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "health check stopped");
                        return;
                    }
                }
            }
            _ = wait_for_shutdown(&connection) => return,
        }
    }
}

/// Resolve when the current session is shut down by `disconnect()`.
///
/// Survives the shutdown channel being replaced by a later `connect()` —
/// the wait simply re-attaches to the new session's signal.
async fn wait_for_shutdown(connection: &ConnectionManager) {
    loop {
        let mut signal = connection.shutdown_signal();
        if *signal.borrow() {
            return;
        }
        match signal.changed().await {
            Ok(()) => {
                if *signal.borrow() {
                    return;
                }
            }
            Err(_) => {
                // Sender replaced by a new connect(); re-attach
                tokio::task::yield_now().await;
            }
        }
    }
}
