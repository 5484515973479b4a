//! Bidirectional byte relay for one session.
//!
//! Each direction is a pump with its own 8 KiB buffer. Both pumps are raced:
//! the first one to see EOF or an error ends the session, the other is
//! dropped mid-flight. Both write halves then get a best-effort shutdown and
//! both streams are dropped, so each socket is closed exactly once.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Per-direction buffer size.
pub const RELAY_BUFFER_SIZE: usize = 8192;

/// Bound on each best-effort shutdown during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Leg of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Upstream => "upstream",
        }
    }
}

/// What ended a session.
#[derive(Debug)]
pub enum Termination {
    /// Orderly shutdown (read returned zero bytes).
    Closed(Side),
    /// Reset-class error; handled like a close.
    Reset(Side),
    /// Any other I/O error.
    Failed { side: Side, error: io::Error },
}

impl Termination {
    fn from_error(side: Side, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Termination::Reset(side),
            _ => Termination::Failed { side, error },
        }
    }

    pub fn side(&self) -> Side {
        match self {
            Termination::Closed(side) | Termination::Reset(side) => *side,
            Termination::Failed { side, .. } => *side,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::Failed { .. })
    }
}

/// Result of a finished session.
#[derive(Debug)]
pub struct RelayOutcome {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    pub ended_by: Termination,
}

enum PumpEnd {
    Eof,
    Read(io::Error),
    Write(io::Error),
}

impl PumpEnd {
    fn into_termination(self, source: Side, sink: Side) -> Termination {
        match self {
            PumpEnd::Eof => Termination::Closed(source),
            PumpEnd::Read(e) => Termination::from_error(source, e),
            PumpEnd::Write(e) => Termination::from_error(sink, e),
        }
    }
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, total: &mut u64) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return PumpEnd::Eof,
            Ok(n) => n,
            Err(e) => return PumpEnd::Read(e),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return PumpEnd::Write(e);
        }
        // TLS streams hold records until flushed.
        if let Err(e) = writer.flush().await {
            return PumpEnd::Write(e);
        }
        *total += n as u64;
    }
}

/// Relay bytes between `client` and `upstream` until either side ends.
///
/// Takes ownership of both streams; they are closed when this returns.
pub async fn relay<C, U>(client: C, upstream: U) -> RelayOutcome
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let mut client_to_upstream = 0u64;
    let mut upstream_to_client = 0u64;

    let ended_by = tokio::select! {
        end = pump(&mut client_read, &mut upstream_write, &mut client_to_upstream) => {
            end.into_termination(Side::Client, Side::Upstream)
        }
        end = pump(&mut upstream_read, &mut client_write, &mut upstream_to_client) => {
            end.into_termination(Side::Upstream, Side::Client)
        }
    };

    match &ended_by {
        Termination::Closed(side) => debug!(side = side.as_str(), "Peer closed"),
        Termination::Reset(side) => debug!(side = side.as_str(), "Peer reset"),
        Termination::Failed { side, error } => {
            warn!(side = side.as_str(), error = %error, "Relay I/O error")
        }
    }

    close(&mut client_write, Side::Client).await;
    close(&mut upstream_write, Side::Upstream).await;
    drop(client_read.unsplit(client_write));
    drop(upstream_read.unsplit(upstream_write));

    RelayOutcome {
        client_to_upstream,
        upstream_to_client,
        ended_by,
    }
}

async fn close<W: AsyncWrite + Unpin>(writer: &mut W, side: Side) {
    match timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(side = side.as_str(), error = %e, "Shutdown error ignored"),
        Err(_) => debug!(side = side.as_str(), "Shutdown timed out"),
    }
}
