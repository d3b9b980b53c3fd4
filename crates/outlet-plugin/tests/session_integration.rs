//! Session manager against a real TCP fake host.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_connector, FakeHost, HostBehaviour};
use outlet_core::protocol::messages::{ChannelRole, LogLevel};
use outlet_plugin::infrastructure::network::session::PLUGIN_NAME;
use outlet_plugin::infrastructure::network::{
    ChannelError, ConnectStep, ConnectionError, SessionManager, SessionState,
};
use tokio::net::TcpListener;

fn session() -> SessionManager {
    SessionManager::new(Arc::new(test_connector()), "garage")
}

async fn expect_signal(session: &SessionManager) {
    tokio::time::timeout(
        Duration::from_secs(2),
        session.wait_for_shutdown_or_disconnect(),
    )
    .await
    .expect("shutdown signal must fire");
}

#[tokio::test]
async fn test_unreachable_port_fails_at_primary_step() {
    // Arrange: a port that was bound and released has no listener.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let session = session();

    // Act
    let err = session.connect("127.0.0.1", port).await.unwrap_err();

    // Assert
    assert_eq!(err.step(), Some(ConnectStep::PrimaryChannel));
    assert!(matches!(
        err,
        ConnectionError::Step {
            source: ChannelError::Connect { .. },
            ..
        }
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_connect_registers_and_shutdown_releases_channels() {
    // Arrange
    let host = FakeHost::start(HostBehaviour::default()).await;
    let session = session();

    // Act
    session.connect("127.0.0.1", host.port).await.unwrap();

    // Assert: both channels announced with one plugin id, one registration.
    assert_eq!(session.state(), SessionState::Connected);
    assert!(host.wait_until(|h| h.open_connections() == 2).await);
    let hellos = host.hellos();
    assert_eq!(
        hellos.iter().map(|h| h.role).collect::<Vec<_>>(),
        vec![ChannelRole::Primary, ChannelRole::Callback]
    );
    assert_eq!(hellos[0].plugin_id, hellos[1].plugin_id);
    let registrations = host.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].plugin_name, PLUGIN_NAME);
    assert_eq!(registrations[0].instance_name, "garage");

    // Act
    session.shutdown().await;

    // Assert
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(host.wait_until(|h| h.open_connections() == 0).await);
    assert_eq!(host.disconnects_received(), 1);
    expect_signal(&session).await;
}

#[tokio::test]
async fn test_log_lines_reach_host() {
    let host = FakeHost::start(HostBehaviour::default()).await;
    let session = session();
    session.connect("127.0.0.1", host.port).await.unwrap();

    session.log_error("relay stuck").await;
    session.debug_log("not forwarded").await;

    assert!(host.wait_until(|h| !h.logs().is_empty()).await);
    let logs = host.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, LogLevel::Error);
    assert_eq!(logs[0].text, "relay stuck");
    assert_eq!(logs[0].source, PLUGIN_NAME);
    session.shutdown().await;
}

#[tokio::test]
async fn test_rejected_registration_leaves_no_channel_open() {
    // Arrange
    let host = FakeHost::start(HostBehaviour {
        reject_registration: true,
        ..HostBehaviour::default()
    })
    .await;
    let session = session();

    // Act
    let err = session.connect("127.0.0.1", host.port).await.unwrap_err();

    // Assert
    assert!(matches!(
        err,
        ConnectionError::Step {
            step: ConnectStep::Registration,
            source: ChannelError::Rejected(_)
        }
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(host.wait_until(|h| h.open_connections() == 0).await);
}

#[tokio::test]
async fn test_dropped_callback_channel_rolls_back_primary() {
    let host = FakeHost::start(HostBehaviour {
        drop_callback_channel: true,
        ..HostBehaviour::default()
    })
    .await;
    let session = session();

    let err = session.connect("127.0.0.1", host.port).await.unwrap_err();

    assert_eq!(err.step(), Some(ConnectStep::CallbackChannel));
    assert!(host.wait_until(|h| h.open_connections() == 0).await);
    assert!(host.registrations().is_empty());
}

#[tokio::test]
async fn test_host_drop_fires_signal_and_allows_reconnect() {
    // Arrange
    let host = FakeHost::start(HostBehaviour::default()).await;
    let session = session();
    session.connect("127.0.0.1", host.port).await.unwrap();

    // Act
    host.drop_all();
    expect_signal(&session).await;

    // Assert
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(host.wait_until(|h| h.open_connections() == 0).await);

    // Act: a new session gets a fresh, unfired signal.
    session.connect("127.0.0.1", host.port).await.unwrap();

    // Assert
    assert_eq!(session.state(), SessionState::Connected);
    assert!(!session.shutdown_signal().is_fired());
    session.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_concurrent_with_host_drop_is_clean() {
    // Arrange
    let host = FakeHost::start(HostBehaviour::default()).await;
    let session = Arc::new(session());
    session.connect("127.0.0.1", host.port).await.unwrap();
    let waiter = {
        let s = Arc::clone(&session);
        tokio::spawn(async move { s.wait_for_shutdown_or_disconnect().await })
    };

    // Act
    let s = Arc::clone(&session);
    let shutdown = tokio::spawn(async move { s.shutdown().await });
    host.drop_all();
    shutdown.await.unwrap();
    session.shutdown().await;

    // Assert
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter woke")
        .unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(host.wait_until(|h| h.open_connections() == 0).await);
}
