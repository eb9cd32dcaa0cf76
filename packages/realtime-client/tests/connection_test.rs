//! Integration tests for the connection state machine
//!
//! Drives the manager over the scripted broker transport: connect,
//! transport drops, automatic reconnection with backoff reset, token
//! loss, and disconnect semantics.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use common::{public_client, wait_for_state, wait_until};
use wavelink_realtime_client::{
    AuthFailure, ChannelKind, ConnectionEvent, ConnectionState, EventHandlers, RealtimeError,
};
use wavelink_test_utils::{MockBroker, ToggleSession};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_initial_state_is_disconnected() {
    let broker = MockBroker::new();
    let client = public_client(&broker);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.get_active_channels().is_empty());
}

#[tokio::test]
async fn test_connect_passes_through_connecting() {
    let broker = MockBroker::new();
    let client = public_client(&broker);
    let mut events = client.connection_events();

    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;

    assert_matches!(events.recv().await.unwrap(), ConnectionEvent::Connecting);
    assert_matches!(
        events.recv().await.unwrap(),
        ConnectionEvent::Connected { socket_id } if socket_id == "socket-1"
    );
}

#[tokio::test]
async fn test_double_connect_is_a_noop() {
    let broker = MockBroker::new();
    let client = public_client(&broker);

    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;

    // Second connect warns and changes nothing
    client.connect().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.connect_count(), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_without_token_is_an_auth_failure() {
    let broker = MockBroker::new();
    let session = Arc::new(ToggleSession::new("tok"));
    session.clear_token();
    let client = common::client_with(&broker, "http://localhost:9/unused-auth", session);

    let result = client.connect();
    assert_matches!(
        result,
        Err(RealtimeError::Auth(AuthFailure::MissingToken))
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnects_after_transport_drop() {
    let broker = MockBroker::new();
    let client = public_client(&broker);
    let mut events = client.connection_events();

    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;

    broker.drop_connection();
    wait_until(WAIT, || broker.connect_count() == 2).await;
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;

    // A fresh socket id on every reconnect
    assert_eq!(broker.current_socket_id().as_deref(), Some("socket-2"));

    // Every Connected is immediately preceded by Connecting, and the
    // drop surfaced as Error then Unavailable in between
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let mut previous: Option<&ConnectionEvent> = None;
    let mut saw_unavailable = false;
    for event in &seen {
        if let ConnectionEvent::Connected { .. } = event {
            assert_matches!(previous, Some(ConnectionEvent::Connecting));
        }
        if let ConnectionEvent::Unavailable = event {
            saw_unavailable = true;
        }
        previous = Some(event);
    }
    assert!(saw_unavailable, "drop did not surface as Unavailable");
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_and_resets_after_success() {
    let broker = MockBroker::new();
    let client = public_client(&broker);

    // First two attempts fail: delays 20ms then 40ms before the third
    // attempt succeeds
    broker.fail_next_connects(2);
    let started = tokio::time::Instant::now();
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(5)).await;
    let to_connect = started.elapsed();
    assert!(
        to_connect >= Duration::from_millis(60) && to_connect < Duration::from_millis(100),
        "expected ~60ms of accumulated backoff, got {:?}",
        to_connect
    );

    // A successful connection resets the attempt counter: the next
    // reconnect waits only the base delay again
    let dropped = tokio::time::Instant::now();
    broker.drop_connection();
    wait_until(Duration::from_secs(5), || broker.connect_count() == 2).await;
    wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(5)).await;
    let to_reconnect = dropped.elapsed();
    assert!(
        to_reconnect >= Duration::from_millis(20) && to_reconnect < Duration::from_millis(60),
        "expected ~20ms base delay after reset, got {:?}",
        to_reconnect
    );
}

#[tokio::test]
async fn test_disconnect_clears_channels_and_stops_reconnect() {
    let broker = MockBroker::new();
    let client = public_client(&broker);

    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;

    client
        .subscribe("lobby", ChannelKind::Public, EventHandlers::new())
        .await
        .unwrap();
    client
        .subscribe("announcements", ChannelKind::Public, EventHandlers::new())
        .await
        .unwrap();
    assert_eq!(client.get_active_channels().len(), 2);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.get_active_channels().is_empty());
    assert!(!client.has_channel("lobby"));

    // No reconnect attempts after an explicit disconnect
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.connect_count(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_stops_when_token_disappears() {
    let broker = MockBroker::new();
    let session = Arc::new(ToggleSession::new("tok"));
    let client =
        common::client_with(&broker, "http://localhost:9/unused-auth", session.clone());

    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;

    session.clear_token();
    broker.drop_connection();

    wait_for_state(&client, ConnectionState::Failed, WAIT).await;
    assert_eq!(broker.connect_count(), 1);
}

#[tokio::test]
async fn test_connect_restarts_a_failed_session() {
    let broker = MockBroker::new();
    let session = Arc::new(ToggleSession::new("tok"));
    let client =
        common::client_with(&broker, "http://localhost:9/unused-auth", session.clone());

    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;
    session.clear_token();
    broker.drop_connection();
    wait_for_state(&client, ConnectionState::Failed, WAIT).await;

    // An explicit re-trigger with a fresh token recovers
    session.set_token("tok-2");
    client.connect().unwrap();
    wait_for_state(&client, ConnectionState::Connected, WAIT).await;
    assert_eq!(broker.connect_count(), 2);
}
