//! Connection behaviour against local sockets that are not SSH servers.

use bridge_traits::error::BridgeError;
use bridge_traits::transfer::{ConnectionState, TransferClient};
use core_runtime::config::RemoteAuth;
use provider_sftp::{SftpConfig, SftpTransferClient};
use secrecy::SecretString;
use std::net::TcpListener;
use std::time::{Duration, Instant};

fn config_for(port: u16) -> SftpConfig {
    SftpConfig::new(
        "127.0.0.1",
        "sync",
        RemoteAuth::Password(SecretString::from("not-used")),
    )
    .with_port(port)
    .with_connect_timeout(Duration::from_secs(1))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_times_out_when_server_never_speaks() {
    // Accepts TCP connections through the backlog but never sends an SSH banner.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = SftpTransferClient::new(config_for(port));
    let started = Instant::now();
    let err = client.connect().await.unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err}");
    assert!(err.to_string().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    drop(listener);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_refused_is_connection_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = SftpTransferClient::new(config_for(port));
    let err = client.connect().await.unwrap_err();

    assert!(
        matches!(err, BridgeError::ConnectionFailed { .. }),
        "expected connection failure, got {err}"
    );
    assert!(err.is_retryable());
    assert!(!client.is_connected().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnect_after_failed_connect_is_noop() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = SftpTransferClient::new(config_for(port));
    let _ = client.connect().await;
    client.disconnect().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_connect_does_not_block_the_next_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = SftpTransferClient::new(config_for(port));

    let abandoned = tokio::time::timeout(Duration::from_millis(100), client.connect()).await;
    assert!(abandoned.is_err());
    assert_eq!(client.state().await, ConnectionState::Disconnected);

    let err = client.connect().await.unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err}");

    drop(listener);
}
