//! Handshake classification from the first bytes of a connection.
//!
//! A connection is classified once, from the first chunk read:
//! - first byte `0x05`: SOCKS-like, the chunk is the handshake
//! - anything else: HTTP-like, reading continues until the header block
//!   terminator `\r\n\r\n`, EOF, or the header size cap
//!
//! The whole stage runs under a single sniff deadline.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::RelayError;

/// Default deadline for the whole classification stage.
pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of each handshake read.
pub const DEFAULT_INITIAL_READ: usize = 1024;

/// Default cap on buffered HTTP header bytes.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 16 * 1024;

/// SOCKS protocol version 5 marker byte.
pub const SOCKS5_VERSION: u8 = 0x05;

/// End of an HTTP header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Kind of handshake the client opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    SocksLike,
    HttpLike,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::SocksLike => "socks",
            Classification::HttpLike => "http",
        }
    }
}

/// Outcome of framing a connection.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub kind: Classification,
    /// Handshake bytes read during classification.
    pub consumed: Vec<u8>,
    /// Bytes read past the header terminator. They belong to the data
    /// stream and must be replayed.
    pub leftover: Vec<u8>,
    /// False when an HTTP-like client closed or hit the size cap before
    /// sending the header terminator.
    pub complete: bool,
}

impl Handshake {
    /// Whether the headers ask for a websocket upgrade over `wss://`.
    pub fn wants_wss_upgrade(&self) -> bool {
        self.kind == Classification::HttpLike
            && contains_ignore_case(&self.consumed, b"upgrade: websocket")
            && contains_ignore_case(&self.consumed, b"wss://")
    }
}

/// Configuration for classification.
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Deadline for the whole classification stage.
    pub timeout: Duration,
    /// Maximum bytes per handshake read.
    pub initial_read: usize,
    /// Maximum HTTP header bytes buffered before giving up on the terminator.
    pub max_header_bytes: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SNIFF_TIMEOUT,
            initial_read: DEFAULT_INITIAL_READ,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

/// Reads and classifies the opening bytes of a connection.
#[derive(Debug, Clone, Default)]
pub struct Framer {
    config: FramerConfig,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FramerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    /// Classify a freshly accepted stream.
    pub async fn frame<R: AsyncRead + Unpin>(&self, stream: &mut R) -> Result<Handshake, RelayError> {
        match timeout(self.config.timeout, self.read_handshake(stream)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::ClassificationTimeout),
        }
    }

    async fn read_handshake<R: AsyncRead + Unpin>(
        &self,
        stream: &mut R,
    ) -> Result<Handshake, RelayError> {
        let mut buffer = vec![0u8; self.config.initial_read];
        let n = stream
            .read(&mut buffer)
            .await
            .map_err(RelayError::HandshakeRead)?;
        if n == 0 {
            return Err(RelayError::EmptyHandshake);
        }
        buffer.truncate(n);

        if buffer[0] == SOCKS5_VERSION {
            return Ok(Handshake {
                kind: Classification::SocksLike,
                consumed: buffer,
                leftover: Vec::new(),
                complete: true,
            });
        }

        let mut chunk = vec![0u8; self.config.initial_read];
        let mut scanned = 0;
        loop {
            if let Some(end) = find_terminator(&buffer, scanned) {
                let leftover = buffer.split_off(end + HEADER_TERMINATOR.len());
                return Ok(Handshake {
                    kind: Classification::HttpLike,
                    consumed: buffer,
                    leftover,
                    complete: true,
                });
            }
            // A terminator may straddle two reads.
            scanned = buffer.len().saturating_sub(HEADER_TERMINATOR.len() - 1);

            if buffer.len() >= self.config.max_header_bytes {
                debug!(
                    buffered = buffer.len(),
                    "Header cap reached without terminator"
                );
                break;
            }

            let want = (self.config.max_header_bytes - buffer.len()).min(chunk.len());
            let n = stream
                .read(&mut chunk[..want])
                .await
                .map_err(RelayError::HandshakeRead)?;
            if n == 0 {
                debug!(buffered = buffer.len(), "Peer closed before header terminator");
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
        }

        Ok(Handshake {
            kind: Classification::HttpLike,
            consumed: buffer,
            leftover: Vec::new(),
            complete: false,
        })
    }
}

fn find_terminator(buffer: &[u8], from: usize) -> Option<usize> {
    buffer[from..]
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| from + pos)
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
}
