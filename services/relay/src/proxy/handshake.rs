//! Greeting written to the client before relaying starts.
//!
//! The SOCKS-like greeting is an HTTP 101 line, not a SOCKS5 method
//! selection reply. Existing clients depend on these exact bytes.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use super::framer::{Classification, Handshake, DEFAULT_SNIFF_TIMEOUT};
use super::stream::{ClientStream, PrefixedStream};
use crate::error::RelayError;

pub const SWITCHING_PROTOCOLS: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\r\n";
pub const OK: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Which fixed response a client gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
    /// Plaintext 101, sent to SOCKS-like clients.
    SwitchingProtocols,
    /// Plaintext 200, sent to HTTP-like clients.
    Ok,
    /// TLS handshake first, then 101 over the encrypted channel.
    SecureSwitchingProtocols,
}

impl Greeting {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            Greeting::SwitchingProtocols | Greeting::SecureSwitchingProtocols => {
                SWITCHING_PROTOCOLS
            }
            Greeting::Ok => OK,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Greeting::SwitchingProtocols => "switching_protocols",
            Greeting::Ok => "ok",
            Greeting::SecureSwitchingProtocols => "tls_switching_protocols",
        }
    }
}

/// Writes greetings and performs the optional TLS upgrade.
#[derive(Clone)]
pub struct Responder {
    acceptor: Option<TlsAcceptor>,
    tls_timeout: Duration,
}

impl Responder {
    /// Responder without TLS; wss requests get the plain 200 reply.
    pub fn plain() -> Self {
        Self {
            acceptor: None,
            tls_timeout: DEFAULT_SNIFF_TIMEOUT,
        }
    }

    pub fn with_tls(acceptor: TlsAcceptor, tls_timeout: Duration) -> Self {
        Self {
            acceptor: Some(acceptor),
            tls_timeout,
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Pick the greeting for a classified handshake.
    pub fn greeting_for(&self, handshake: &Handshake) -> Greeting {
        match handshake.kind {
            Classification::SocksLike => Greeting::SwitchingProtocols,
            Classification::HttpLike if self.tls_enabled() && handshake.wants_wss_upgrade() => {
                Greeting::SecureSwitchingProtocols
            }
            Classification::HttpLike => Greeting::Ok,
        }
    }

    /// Send `greeting`, upgrading to TLS first when it asks for it.
    ///
    /// Returns the client stream the relay must use from now on.
    pub async fn respond<S>(
        &self,
        greeting: Greeting,
        stream: PrefixedStream<S>,
    ) -> Result<ClientStream<S>, RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client = match (greeting, &self.acceptor) {
            (Greeting::SecureSwitchingProtocols, Some(acceptor)) => {
                let tls = timeout(self.tls_timeout, acceptor.accept(stream))
                    .await
                    .map_err(|_| {
                        RelayError::TlsHandshake(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "tls handshake timed out",
                        ))
                    })?
                    .map_err(RelayError::TlsHandshake)?;
                debug!("TLS handshake complete");
                ClientStream::Tls(Box::new(tls))
            }
            _ => ClientStream::Plain(stream),
        };

        write_greeting(&mut client, greeting.bytes()).await?;
        Ok(client)
    }
}

async fn write_greeting<W: AsyncWrite + Unpin>(
    stream: &mut W,
    bytes: &[u8],
) -> Result<(), RelayError> {
    stream
        .write_all(bytes)
        .await
        .map_err(RelayError::HandshakeWrite)?;
    stream.flush().await.map_err(RelayError::HandshakeWrite)
}
