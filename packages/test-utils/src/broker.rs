//! Scripted in-memory broker transport
//!
//! Implements the realtime client's [`Transport`] seam over plain
//! channels, so tests can drive subscriptions, push events, and kill
//! the connection deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use wavelink_realtime_client::{
    BrokerConfig, BrokerFrame, EventEnvelope, PresenceMember, RealtimeError, RealtimeResult,
    SubscriptionGrant, Transport, TransportCommand, TransportLink,
};

const FRAME_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 64;

/// A scripted broker the client connects to instead of a real socket
///
/// By default every connect succeeds (with socket ids `socket-1`,
/// `socket-2`, ...) and every subscription is confirmed immediately.
/// Tests opt channels into rejection, script connect failures, seed
/// presence member snapshots, and push arbitrary frames.
#[derive(Clone)]
pub struct MockBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
}

struct BrokerState {
    connects: u32,
    fail_connects: u32,
    auto_confirm: bool,
    rejected: HashSet<String>,
    members: HashMap<String, Vec<PresenceMember>>,
    subscribes: Vec<(String, Option<SubscriptionGrant>)>,
    unsubscribes: Vec<String>,
    frames: Option<mpsc::Sender<BrokerFrame>>,
    socket_id: Option<String>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState {
                    connects: 0,
                    fail_connects: 0,
                    auto_confirm: true,
                    rejected: HashSet::new(),
                    members: HashMap::new(),
                    subscribes: Vec::new(),
                    unsubscribes: Vec::new(),
                    frames: None,
                    socket_id: None,
                }),
            }),
        })
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Fail the next `n` connect attempts with a transport error
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects = n;
    }

    /// Reject every subscription for this channel until allowed again
    pub fn reject_channel(&self, channel: &str) {
        self.lock().rejected.insert(channel.to_string());
    }

    /// Stop rejecting subscriptions for this channel
    pub fn allow_channel(&self, channel: &str) {
        self.lock().rejected.remove(channel);
    }

    /// Seed the member snapshot delivered with this channel's
    /// subscription confirmation
    pub fn set_members(&self, channel: &str, members: Vec<PresenceMember>) {
        self.lock().members.insert(channel.to_string(), members);
    }

    /// Toggle automatic subscription confirmations; with confirmations
    /// off, tests push `SubscriptionSucceeded` frames themselves
    pub fn set_auto_confirm(&self, enabled: bool) {
        self.lock().auto_confirm = enabled;
    }

    /// Push a frame to the connected client. Returns false when no
    /// connection is up.
    pub fn push_frame(&self, frame: BrokerFrame) -> bool {
        let sender = self.lock().frames.clone();
        match sender {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Push an application event on a channel
    pub fn push_event(&self, channel: &str, event: &str, payload: serde_json::Value) -> bool {
        self.push_frame(BrokerFrame::Event(EventEnvelope {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
            received_at: chrono::Utc::now(),
        }))
    }

    /// Kill the current connection; the client sees a transport drop
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.frames = None;
        state.socket_id = None;
    }

    // =========================================================================
    // Observations
    // =========================================================================

    /// How many connections have been opened
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    /// Socket id of the live connection, if any
    pub fn current_socket_id(&self) -> Option<String> {
        self.lock().socket_id.clone()
    }

    /// How many subscribe commands arrived for this channel
    pub fn subscribe_count(&self, channel: &str) -> usize {
        self.lock()
            .subscribes
            .iter()
            .filter(|(name, _)| name == channel)
            .count()
    }

    /// The grant presented with the latest subscribe for this channel
    pub fn last_grant(&self, channel: &str) -> Option<Option<SubscriptionGrant>> {
        self.lock()
            .subscribes
            .iter()
            .rev()
            .find(|(name, _)| name == channel)
            .map(|(_, grant)| grant.clone())
    }

    /// How many unsubscribe commands arrived for this channel
    pub fn unsubscribe_count(&self, channel: &str) -> usize {
        self.lock()
            .unsubscribes
            .iter()
            .filter(|name| name.as_str() == channel)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.inner.state.lock().expect("broker state poisoned")
    }
}

#[async_trait]
impl Transport for MockBroker {
    async fn open(&self, _config: &BrokerConfig) -> RealtimeResult<TransportLink> {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(COMMAND_BUFFER);

        let socket_id = {
            let mut state = self.lock();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(RealtimeError::Transport(
                    "scripted connect failure".to_string(),
                ));
            }
            state.connects += 1;
            let socket_id = format!("socket-{}", state.connects);
            state.frames = Some(frames_tx);
            state.socket_id = Some(socket_id.clone());
            socket_id
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                match command {
                    TransportCommand::Subscribe { channel, grant } => {
                        let (reply, sender) = {
                            let mut state =
                                inner.state.lock().expect("broker state poisoned");
                            state.subscribes.push((channel.clone(), grant));
                            let reply = if state.rejected.contains(&channel) {
                                Some(BrokerFrame::SubscriptionError {
                                    channel: channel.clone(),
                                    message: "subscription rejected".to_string(),
                                })
                            } else if state.auto_confirm {
                                Some(BrokerFrame::SubscriptionSucceeded {
                                    channel: channel.clone(),
                                    members: state
                                        .members
                                        .get(&channel)
                                        .cloned()
                                        .unwrap_or_default(),
                                })
                            } else {
                                None
                            };
                            (reply, state.frames.clone())
                        };
                        if let (Some(frame), Some(tx)) = (reply, sender) {
                            let _ = tx.send(frame).await;
                        }
                    }
                    TransportCommand::Unsubscribe { channel } => {
                        inner
                            .state
                            .lock()
                            .expect("broker state poisoned")
                            .unsubscribes
                            .push(channel);
                    }
                    TransportCommand::Close => {
                        let mut state = inner.state.lock().expect("broker state poisoned");
                        state.frames = None;
                        state.socket_id = None;
                        break;
                    }
                }
            }
        });

        Ok(TransportLink {
            socket_id,
            commands: cmd_tx,
            frames: frames_rx,
        })
    }
}
