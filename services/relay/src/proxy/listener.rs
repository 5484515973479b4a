//! TCP listener and per-connection session pipeline.
//!
//! Every accepted connection gets its own task running
//! framer -> greeting -> upstream dial -> relay. The accept loop never waits
//! on a session. When the shutdown future resolves the listening socket is
//! closed and the in-flight sessions are handed back to the caller, which
//! decides how long to let them drain.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

use super::dialer::{DialerConfig, UpstreamDialer};
use super::framer::{Classification, Framer, FramerConfig};
use super::handshake::{Greeting, Responder};
use super::relay::{relay, RelayOutcome, Side, Termination};
use super::stream::PrefixedStream;
use crate::config::Config;
use crate::error::RelayError;

/// Pause after an accept error before accepting again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Handshake sniffing limits.
    pub framer: FramerConfig,
    /// Upstream target.
    pub dialer: DialerConfig,
    /// Replay consumed handshake bytes to the upstream.
    pub forward_handshake: bool,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            framer: FramerConfig::default(),
            dialer: DialerConfig::default(),
            forward_handshake: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.bind_addr,
            framer: config.framer.clone(),
            dialer: config.dialer.clone(),
            forward_handshake: config.forward_handshake,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently being handled.
    pub connections_active: AtomicU64,
    /// Connections fully torn down.
    pub connections_closed: AtomicU64,
    /// Peers that closed without sending anything.
    pub empty_handshakes: AtomicU64,
    /// Peers that missed the sniff deadline.
    pub classification_timeouts: AtomicU64,
    /// Connections classified as SOCKS-like.
    pub socks_classified: AtomicU64,
    /// Connections classified as HTTP-like.
    pub http_classified: AtomicU64,
    /// Successful TLS upgrades on the wss path.
    pub tls_upgrades: AtomicU64,
    /// Greeting writes, TLS handshakes or handshake reads that failed.
    pub handshake_failures: AtomicU64,
    /// Upstream connections established.
    pub upstream_connected: AtomicU64,
    /// Upstream connections that failed.
    pub upstream_failed: AtomicU64,
    /// Bytes relayed client -> upstream.
    pub bytes_to_upstream: AtomicU64,
    /// Bytes relayed upstream -> client.
    pub bytes_to_client: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_closed: u64,
    pub empty_handshakes: u64,
    pub classification_timeouts: u64,
    pub socks_classified: u64,
    pub http_classified: u64,
    pub tls_upgrades: u64,
    pub handshake_failures: u64,
    pub upstream_connected: u64,
    pub upstream_failed: u64,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            connections_accepted: load(&self.connections_accepted),
            connections_active: load(&self.connections_active),
            connections_closed: load(&self.connections_closed),
            empty_handshakes: load(&self.empty_handshakes),
            classification_timeouts: load(&self.classification_timeouts),
            socks_classified: load(&self.socks_classified),
            http_classified: load(&self.http_classified),
            tls_upgrades: load(&self.tls_upgrades),
            handshake_failures: load(&self.handshake_failures),
            upstream_connected: load(&self.upstream_connected),
            upstream_failed: load(&self.upstream_failed),
            bytes_to_upstream: load(&self.bytes_to_upstream),
            bytes_to_client: load(&self.bytes_to_client),
        }
    }

    fn record_error(&self, err: &RelayError) {
        let counter = match err {
            RelayError::EmptyHandshake => &self.empty_handshakes,
            RelayError::ClassificationTimeout => &self.classification_timeouts,
            RelayError::UpstreamDial { .. } => &self.upstream_failed,
            _ => &self.handshake_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Holds a session in `connections_active` until dropped, which also covers
/// tasks aborted by [`Sessions::drain`].
struct ActiveSession(Arc<ListenerStats>);

impl ActiveSession {
    fn enter(stats: &Arc<ListenerStats>) -> Self {
        stats.connections_active.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(stats))
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.0.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a session task needs. Shared read-only across tasks; it does
/// not hold the listening socket.
struct Pipeline {
    framer: Framer,
    responder: Responder,
    dialer: UpstreamDialer,
    forward_handshake: bool,
    stats: Arc<ListenerStats>,
}

impl Pipeline {
    async fn handle(&self, stream: TcpStream) {
        match self.session(stream).await {
            Ok(outcome) => {
                self.stats
                    .bytes_to_upstream
                    .fetch_add(outcome.client_to_upstream, Ordering::Relaxed);
                self.stats
                    .bytes_to_client
                    .fetch_add(outcome.upstream_to_client, Ordering::Relaxed);
                debug!(
                    bytes_to_upstream = outcome.client_to_upstream,
                    bytes_to_client = outcome.upstream_to_client,
                    ended_by = outcome.ended_by.side().as_str(),
                    "Session closed"
                );
            }
            Err(e) => {
                self.stats.record_error(&e);
                // Dial failures were already logged by the dialer.
                if e.is_quiet() || matches!(e, RelayError::UpstreamDial { .. }) {
                    debug!(reason = e.reason_code(), "Connection dropped");
                } else {
                    warn!(reason = e.reason_code(), error = %e, "Connection dropped");
                }
            }
        }
    }

    async fn session(&self, mut stream: TcpStream) -> Result<RelayOutcome, RelayError> {
        let mut handshake = self.framer.frame(&mut stream).await?;

        let classified = match handshake.kind {
            Classification::SocksLike => &self.stats.socks_classified,
            Classification::HttpLike => &self.stats.http_classified,
        };
        classified.fetch_add(1, Ordering::Relaxed);

        let greeting = self.responder.greeting_for(&handshake);
        debug!(
            kind = handshake.kind.as_str(),
            greeting = greeting.as_str(),
            consumed = handshake.consumed.len(),
            leftover = handshake.leftover.len(),
            complete = handshake.complete,
            "Handshake classified"
        );

        let leftover = std::mem::take(&mut handshake.leftover);
        let client = self
            .responder
            .respond(greeting, PrefixedStream::new(leftover, stream))
            .await?;
        if greeting == Greeting::SecureSwitchingProtocols {
            self.stats.tls_upgrades.fetch_add(1, Ordering::Relaxed);
        }

        let mut upstream = self.dialer.dial().await?;
        self.stats.upstream_connected.fetch_add(1, Ordering::Relaxed);

        if self.forward_handshake {
            if let Err(error) = upstream.write_all(&handshake.consumed).await {
                return Ok(RelayOutcome {
                    client_to_upstream: 0,
                    upstream_to_client: 0,
                    ended_by: Termination::Failed {
                        side: Side::Upstream,
                        error,
                    },
                });
            }
        }

        Ok(relay(client, upstream).await)
    }
}

/// A bound TCP listener for the relay.
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Session pipeline shared with connection tasks.
    pipeline: Arc<Pipeline>,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listening socket.
    pub async fn bind(config: ListenerConfig, responder: Responder) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.bind_addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| RelayError::Bind {
            addr: config.bind_addr.to_string(),
            source,
        })?;

        info!(
            bind_addr = %local_addr,
            upstream = %config.dialer.target(),
            tls = responder.tls_enabled(),
            "Listener bound"
        );

        let stats = Arc::new(ListenerStats::default());
        let pipeline = Arc::new(Pipeline {
            framer: Framer::with_config(config.framer),
            responder,
            dialer: UpstreamDialer::new(config.dialer),
            forward_handshake: config.forward_handshake,
            stats: Arc::clone(&stats),
        });

        Ok(Self {
            listener,
            pipeline,
            stats,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept connections until `shutdown` resolves or the socket goes away.
    ///
    /// The listening socket is closed before this returns. Sessions still
    /// running are returned, untouched.
    pub async fn run<F>(self, shutdown: F) -> Sessions
    where
        F: Future<Output = ()>,
    {
        let Listener {
            listener, pipeline, ..
        } = self;
        let local_addr = listener.local_addr().ok();
        info!(bind_addr = ?local_addr, "Listener started");

        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }

                // Reap finished sessions so the set does not grow.
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Session task panicked");
                        }
                    }
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        pipeline
                            .stats
                            .connections_accepted
                            .fetch_add(1, Ordering::Relaxed);
                        let active = ActiveSession::enter(&pipeline.stats);

                        let pipeline = Arc::clone(&pipeline);
                        sessions.spawn(
                            async move {
                                let _active = active;
                                pipeline.handle(stream).await
                            }
                            .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                        );
                    }
                    Err(e) if is_listener_gone(&e) => {
                        warn!(error = %e, "Listening socket closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        info!(
            bind_addr = ?local_addr,
            in_flight = sessions.len(),
            "Listener closed"
        );

        Sessions { tasks: sessions }
    }
}

fn is_listener_gone(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EBADF) | Some(libc::EINVAL) | Some(libc::ENOTSOCK)
    )
}

/// Sessions still running after the listener closed.
pub struct Sessions {
    tasks: JoinSet<()>,
}

impl Sessions {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the sessions to end on their own.
    ///
    /// With a limit, sessions still running when it expires are aborted.
    /// Returns how many were aborted.
    pub async fn drain(mut self, limit: Option<Duration>) -> usize {
        match limit {
            None => {
                join_all(&mut self.tasks).await;
                0
            }
            Some(limit) => {
                if timeout(limit, join_all(&mut self.tasks)).await.is_ok() {
                    return 0;
                }
                let aborted = self.tasks.len();
                self.tasks.abort_all();
                join_all(&mut self.tasks).await;
                aborted
            }
        }
    }
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_config_default() {
        let config = ListenerConfig::new("0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.dialer.target(), "127.0.0.1:22");
        assert!(!config.forward_handshake);
    }

    #[test]
    fn test_stats_snapshot_and_error_buckets() {
        let stats = ListenerStats::default();
        stats.connections_accepted.fetch_add(2, Ordering::Relaxed);
        stats.record_error(&RelayError::EmptyHandshake);
        stats.record_error(&RelayError::ClassificationTimeout);
        stats.record_error(&RelayError::HandshakeWrite(io::Error::from(
            io::ErrorKind::BrokenPipe,
        )));

        let snap = stats.snapshot();
        assert_eq!(snap.connections_accepted, 2);
        assert_eq!(snap.empty_handshakes, 1);
        assert_eq!(snap.classification_timeouts, 1);
        assert_eq!(snap.handshake_failures, 1);
        assert_eq!(snap.upstream_failed, 0);
    }

    #[test]
    fn test_listener_gone_errors() {
        assert!(is_listener_gone(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(!is_listener_gone(&io::Error::from_raw_os_error(libc::EMFILE)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_listening_socket() {
        let listener = Listener::bind(
            ListenerConfig::new("127.0.0.1:0".parse().unwrap()),
            Responder::plain(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();

        let sessions = listener.run(async {}).await;
        assert!(sessions.is_empty());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_with_limit_aborts_stragglers() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async { tokio::time::sleep(Duration::from_secs(3600)).await });
        tasks.spawn(async {});
        let sessions = Sessions { tasks };

        let aborted = sessions.drain(Some(Duration::from_millis(50))).await;
        assert_eq!(aborted, 1);
    }

    #[tokio::test]
    async fn test_aborted_session_leaves_active_count() {
        let stats = Arc::new(ListenerStats::default());

        let mut tasks = JoinSet::new();
        for _ in 0..2 {
            let active = ActiveSession::enter(&stats);
            tasks.spawn(async move {
                let _active = active;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
        }
        let active = ActiveSession::enter(&stats);
        tasks.spawn(async move {
            let _active = active;
        });
        assert_eq!(stats.connections_active.load(Ordering::Relaxed), 3);

        let aborted = Sessions { tasks }
            .drain(Some(Duration::from_millis(50)))
            .await;
        assert_eq!(aborted, 2);

        let snap = stats.snapshot();
        assert_eq!(snap.connections_active, 0);
        assert_eq!(snap.connections_closed, 3);
    }
}
