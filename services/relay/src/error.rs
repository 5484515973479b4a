//! Error types for the relay.

use std::io;

use thiserror::Error;

/// Per-connection and startup errors with standardized reason codes.
///
/// Everything except `Config`, `TlsConfig` and `Bind` is scoped to a single
/// connection and never leaves that connection's task.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Peer closed before sending a single byte.
    #[error("empty_handshake")]
    EmptyHandshake,

    /// Peer did not complete its handshake before the sniff deadline.
    #[error("classification_timeout")]
    ClassificationTimeout,

    /// Reading the handshake bytes failed.
    #[error("handshake_read_failed: {0}")]
    HandshakeRead(#[source] io::Error),

    /// The greeting could not be written and flushed.
    #[error("handshake_write_failed: {0}")]
    HandshakeWrite(#[source] io::Error),

    /// Server side TLS handshake on the wss path failed.
    #[error("tls_handshake_failed: {0}")]
    TlsHandshake(#[source] io::Error),

    /// The fixed upstream could not be reached.
    #[error("upstream_dial_failed: {target}: {source}")]
    UpstreamDial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Invalid configuration value.
    #[error("config_invalid: {0}")]
    Config(String),

    /// Certificate or key could not be loaded.
    #[error("tls_config_invalid: {0}")]
    TlsConfig(String),

    /// Listening socket could not be bound.
    #[error("bind_failed: {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl RelayError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            RelayError::EmptyHandshake => "empty_handshake",
            RelayError::ClassificationTimeout => "classification_timeout",
            RelayError::HandshakeRead(_) => "handshake_read_failed",
            RelayError::HandshakeWrite(_) => "handshake_write_failed",
            RelayError::TlsHandshake(_) => "tls_handshake_failed",
            RelayError::UpstreamDial { .. } => "upstream_dial_failed",
            RelayError::Config(_) => "config_invalid",
            RelayError::TlsConfig(_) => "tls_config_invalid",
            RelayError::Bind { .. } => "bind_failed",
        }
    }

    /// Whether the error is an ordinary client-side drop that only deserves
    /// debug logging.
    pub fn is_quiet(&self) -> bool {
        matches!(
            self,
            RelayError::EmptyHandshake | RelayError::ClassificationTimeout
        )
    }
}
