//! Shared helpers for the integration suites
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use wavelink_realtime_client::{
    BrokerConfig, ConnectionState, RealtimeClient, ReconnectPolicy, SessionProvider,
    StaticSession,
};
use wavelink_test_utils::MockBroker;

/// A config with millisecond-scale reconnect backoff for test runs
pub fn fast_config(auth_url: &str) -> BrokerConfig {
    let mut config =
        BrokerConfig::new("ws://localhost:9999/ws", auth_url).expect("valid test config");
    config.reconnect = ReconnectPolicy {
        min_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(160),
        growth_factor: 2.0,
    };
    config.subscribe_timeout = Duration::from_millis(500);
    config
}

/// A client over the scripted broker that never talks to an auth
/// endpoint (public channels only)
pub fn public_client(broker: &Arc<MockBroker>) -> RealtimeClient {
    client_with(
        broker,
        "http://localhost:9/unused-auth",
        Arc::new(StaticSession::new("tok")),
    )
}

/// A client over the scripted broker with a real auth endpoint URL
pub fn client_with(
    broker: &Arc<MockBroker>,
    auth_url: &str,
    session: Arc<dyn SessionProvider>,
) -> RealtimeClient {
    RealtimeClient::with_transport(fast_config(auth_url), session, broker.clone())
        .expect("client construction")
}

/// Wait until the connection reaches `target`, or panic after `timeout`
pub async fn wait_for_state(client: &RealtimeClient, target: ConnectionState, timeout: Duration) {
    let mut changes = client.state_changes();
    let reached = tokio::time::timeout(timeout, async {
        loop {
            if *changes.borrow() == target {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for state {}", target);
    assert_eq!(client.state(), target);
}

/// Poll a condition until it holds, or panic after `timeout`
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
