//! Test harness for relay integration tests.
//!
//! Provides helpers to spawn recording upstreams, relay listeners, and TLS
//! material for the wss upgrade path.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use sshbridge_relay::{
    DialerConfig, Listener, ListenerConfig, ListenerStats, Responder, Sessions,
};

pub const SOCKS_GREETING: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\r\n";
pub const HTTP_GREETING: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// How the fake upstream behaves per connection.
#[allow(dead_code)]
#[derive(Clone, Copy)]
pub enum UpstreamMode {
    /// Echo everything back.
    Echo,
    /// Send a banner, then echo.
    BannerThenEcho(&'static [u8]),
    /// Close right after accepting.
    CloseImmediately,
}

/// A fake sshd that records every byte it receives.
#[allow(dead_code)]
pub struct RecordingUpstream {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    pub received: Arc<RwLock<Vec<u8>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl RecordingUpstream {
    pub async fn spawn(mode: UpstreamMode) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let received = Arc::new(RwLock::new(Vec::new()));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let received_clone = Arc::clone(&received);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                let received = Arc::clone(&received_clone);
                                tokio::spawn(async move {
                                    match mode {
                                        UpstreamMode::CloseImmediately => return,
                                        UpstreamMode::BannerThenEcho(banner) => {
                                            if stream.write_all(banner).await.is_err() {
                                                return;
                                            }
                                        }
                                        UpstreamMode::Echo => {}
                                    }
                                    let mut buf = vec![0u8; 8192];
                                    loop {
                                        match stream.read(&mut buf).await {
                                            Ok(0) => break,
                                            Ok(n) => {
                                                received.write().await.extend_from_slice(&buf[..n]);
                                                if stream.write_all(&buf[..n]).await.is_err() {
                                                    break;
                                                }
                                            }
                                            Err(_) => break,
                                        }
                                    }
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            received,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub async fn received(&self) -> Vec<u8> {
        self.received.read().await.clone()
    }
}

impl Drop for RecordingUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A relay listener running in the background.
#[allow(dead_code)]
pub struct RelayHandle {
    pub listen_addr: SocketAddr,
    pub stats: Arc<ListenerStats>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Sessions>>,
}

#[allow(dead_code)]
impl RelayHandle {
    pub async fn spawn(upstream_port: u16) -> io::Result<Self> {
        Self::spawn_with(upstream_port, Responder::plain(), false).await
    }

    pub async fn spawn_with(
        upstream_port: u16,
        responder: Responder,
        forward_handshake: bool,
    ) -> io::Result<Self> {
        let mut config = ListenerConfig::new("127.0.0.1:0".parse().unwrap());
        config.dialer = DialerConfig {
            port: upstream_port,
            connect_timeout: Duration::from_secs(2),
            ..DialerConfig::default()
        };
        config.framer.timeout = Duration::from_millis(500);
        config.forward_handshake = forward_handshake;

        let listener = Listener::bind(config, responder)
            .await
            .map_err(io::Error::other)?;
        let listen_addr = listener.local_addr()?;
        let stats = listener.stats();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            listener
                .run(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(Self {
            listen_addr,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Stop accepting and return the sessions still in flight.
    pub async fn shutdown(&mut self) -> Sessions {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task
            .take()
            .expect("relay already shut down")
            .await
            .expect("listener task panicked")
    }

    pub fn closed(&self) -> u64 {
        self.stats.connections_closed.load(Ordering::Relaxed)
    }
}

/// Port with nothing listening on it.
#[allow(dead_code)]
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Poll `cond` until it holds or two seconds pass.
#[allow(dead_code)]
pub async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Read exactly `len` bytes with a timeout.
#[allow(dead_code)]
pub async fn read_exactly<R: tokio::io::AsyncRead + Unpin>(
    stream: &mut R,
    len: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))??;
    Ok(buf)
}

/// Self-signed certificate for the relay's wss path.
#[allow(dead_code)]
pub struct TestCert {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

#[allow(dead_code)]
impl TestCert {
    pub fn generate(server_name: &str) -> Self {
        let cert = rcgen::generate_simple_self_signed(vec![server_name.to_string()]).unwrap();
        Self {
            cert_der: cert.cert.der().to_vec(),
            key_der: cert.key_pair.serialize_der(),
        }
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        let certs = vec![CertificateDer::from(self.cert_der.clone())];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();

        TlsAcceptor::from(Arc::new(config))
    }

    /// Run a TLS client handshake over an already-connected stream.
    pub async fn connect(
        &self,
        stream: TcpStream,
        server_name: &str,
    ) -> io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store
            .add(CertificateDer::from(self.cert_der.clone()))
            .map_err(io::Error::other)?;

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        connector.connect(server_name, stream).await
    }
}
