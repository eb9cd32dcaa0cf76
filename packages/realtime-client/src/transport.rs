//! Broker transport seam
//!
//! The connection manager treats the transport as a black box that can
//! be opened, accepts subscribe/unsubscribe commands, and emits decoded
//! frames until it drops. The shipped implementation speaks the JSON
//! protocol over a WebSocket; tests substitute a scripted transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use crate::config::BrokerConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::protocol::{BrokerFrame, ClientFrame, SubscriptionGrant};

/// Commands accepted by an open transport
#[derive(Debug)]
pub enum TransportCommand {
    /// Join a channel, presenting the grant for private/presence kinds
    Subscribe {
        channel: String,
        grant: Option<SubscriptionGrant>,
    },

    /// Leave a channel
    Unsubscribe { channel: String },

    /// Close the connection cleanly
    Close,
}

/// One established broker connection.
///
/// The link is dropped when `frames` yields `None` — the broker closed
/// the socket or the network went away.
pub struct TransportLink {
    /// Socket id the broker assigned to this connection
    pub socket_id: String,

    /// Command channel into the transport
    pub commands: mpsc::Sender<TransportCommand>,

    /// Decoded inbound frames, in arrival order
    pub frames: mpsc::Receiver<BrokerFrame>,
}

/// A way of opening broker connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and wait for the broker to assign a socket id.
    async fn open(&self, config: &BrokerConfig) -> RealtimeResult<TransportLink>;
}

/// Command channel depth; subscribes are rare, this never fills in practice
const COMMAND_BUFFER: usize = 64;

/// Inbound frame buffer between the reader task and the dispatcher
const FRAME_BUFFER: usize = 256;

/// The shipped WebSocket transport
#[derive(Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, config: &BrokerConfig) -> RealtimeResult<TransportLink> {
        let (ws_stream, response) = connect_async(config.websocket_url.as_str())
            .await
            .map_err(|e| RealtimeError::Transport(format!("connect failed: {}", e)))?;
        debug!(status = %response.status(), "websocket connected");

        let (mut write, mut read) = ws_stream.split();

        // The broker speaks first: wait for the socket id assignment.
        let socket_id = timeout(config.established_timeout, async {
            loop {
                let message = match read.next().await {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        return Err(RealtimeError::Transport(format!("handshake read: {}", e)))
                    }
                    None => {
                        return Err(RealtimeError::Transport(
                            "connection closed during handshake".to_string(),
                        ))
                    }
                };
                if let Message::Text(text) = message {
                    match BrokerFrame::decode(&text) {
                        Ok(Some(BrokerFrame::Established { socket_id })) => {
                            return Ok(socket_id)
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            debug!(error = %e, "undecodable frame during handshake");
                            continue;
                        }
                    }
                }
            }
        })
        .await
        .map_err(|_| {
            RealtimeError::Transport("timed out waiting for socket id assignment".to_string())
        })??;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<TransportCommand>(COMMAND_BUFFER);
        let (frame_tx, frame_rx) = mpsc::channel::<BrokerFrame>(FRAME_BUFFER);

        // Writer task: commands and keepalive pings share the sink.
        let ping_interval = config.ping_interval;
        tokio::spawn(async move {
            let mut ping = interval(ping_interval);
            ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; the broker just saw us connect.
            ping.tick().await;

            loop {
                tokio::select! {
                    _ = ping.tick() => {
                        if send_frame(&mut write, &ClientFrame::Ping).await.is_err() {
                            break;
                        }
                    }
                    cmd = cmd_rx.recv() => {
                        let frame = match cmd {
                            Some(TransportCommand::Subscribe { channel, grant }) => {
                                ClientFrame::subscribe(channel, grant.as_ref())
                            }
                            Some(TransportCommand::Unsubscribe { channel }) => {
                                ClientFrame::unsubscribe(channel)
                            }
                            Some(TransportCommand::Close) | None => {
                                let _ = write.send(Message::Close(None)).await;
                                break;
                            }
                        };
                        if send_frame(&mut write, &frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Reader task: decode and forward until the socket drops. The
        // frame sender being dropped is the disconnect signal upstream.
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match BrokerFrame::decode(&text) {
                        Ok(Some(frame)) => {
                            if frame_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => trace!("ignoring unroutable frame"),
                        Err(e) => debug!(error = %e, "dropping undecodable frame"),
                    },
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                        trace!("websocket keepalive");
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "websocket close received");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
        });

        Ok(TransportLink {
            socket_id,
            commands: cmd_tx,
            frames: frame_rx,
        })
    }
}

async fn send_frame<S>(sink: &mut S, frame: &ClientFrame) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to encode client frame");
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await.map_err(|_| ())
}
