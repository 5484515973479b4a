mod harness;

use std::sync::atomic::Ordering;
use std::time::Duration;

use harness::{read_exactly, RecordingUpstream, RelayHandle, UpstreamMode, SOCKS_GREETING};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

#[tokio::test]
async fn shutdown_stops_accepting_but_keeps_sessions() {
    let upstream = RecordingUpstream::spawn(UpstreamMode::Echo).await.unwrap();
    let mut relay = RelayHandle::spawn(upstream.addr.port()).await.unwrap();

    let mut client = TcpStream::connect(relay.listen_addr).await.unwrap();
    client.write_all(b"\x05\x01\x00").await.unwrap();
    read_exactly(&mut client, SOCKS_GREETING.len()).await.unwrap();

    let sessions = relay.shutdown().await;
    assert_eq!(sessions.len(), 1);
    assert!(TcpStream::connect(relay.listen_addr).await.is_err());

    // The in-flight session still relays.
    client.write_all(b"after shutdown").await.unwrap();
    assert_eq!(
        read_exactly(&mut client, 14).await.unwrap(),
        b"after shutdown"
    );

    let drain = tokio::spawn(sessions.drain(None));
    drop(client);
    let aborted = timeout(Duration::from_secs(2), drain)
        .await
        .expect("drain did not finish")
        .unwrap();
    assert_eq!(aborted, 0);
}

#[tokio::test]
async fn drain_limit_aborts_idle_sessions() {
    let upstream = RecordingUpstream::spawn(UpstreamMode::Echo).await.unwrap();
    let mut relay = RelayHandle::spawn(upstream.addr.port()).await.unwrap();

    let mut client = TcpStream::connect(relay.listen_addr).await.unwrap();
    client.write_all(b"\x05\x01\x00").await.unwrap();
    read_exactly(&mut client, SOCKS_GREETING.len()).await.unwrap();

    let sessions = relay.shutdown().await;
    let aborted = sessions.drain(Some(Duration::from_millis(100))).await;
    assert_eq!(aborted, 1);
    assert_eq!(relay.stats.connections_active.load(Ordering::Relaxed), 0);
    assert_eq!(relay.closed(), 1);

    // Aborting the task drops both sockets.
    let mut buf = [0u8; 8];
    let n = timeout(
        Duration::from_secs(2),
        tokio::io::AsyncReadExt::read(&mut client, &mut buf),
    )
    .await
    .expect("client was not closed")
    .unwrap_or(0);
    assert_eq!(n, 0);
}
