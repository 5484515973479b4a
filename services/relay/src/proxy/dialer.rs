//! Upstream connection setup.
//!
//! One fresh connection per accepted client, to a single fixed target.
//! A failed dial is terminal for that client: no retry, no fallback.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::RelayError;

/// Default upstream host (local sshd).
pub const DEFAULT_UPSTREAM_HOST: &str = "127.0.0.1";

/// Default upstream port.
pub const DEFAULT_UPSTREAM_PORT: u16 = 22;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream target and connect behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_UPSTREAM_HOST.to_string(),
            port: DEFAULT_UPSTREAM_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl DialerConfig {
    /// `host:port` form of the target, bracketing IPv6 literals.
    pub fn target(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Opens connections to the configured upstream.
#[derive(Debug, Clone, Default)]
pub struct UpstreamDialer {
    config: DialerConfig,
}

impl UpstreamDialer {
    pub fn new(config: DialerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Connect to the upstream, bounded by the connect timeout.
    pub async fn dial(&self) -> Result<TcpStream, RelayError> {
        let target = self.config.target();
        debug!(upstream = %target, "Connecting to upstream");

        let connect = TcpStream::connect((self.config.host.as_str(), self.config.port));
        let result = match timeout(self.config.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
        };

        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY on upstream");
                }
                Ok(stream)
            }
            Err(source) => {
                warn!(upstream = %target, error = %source, "Upstream connection failed");
                Err(RelayError::UpstreamDial { target, source })
            }
        }
    }
}
