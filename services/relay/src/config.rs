//! Relay configuration.
//!
//! The listening port is the only required startup parameter; everything
//! else comes from the environment with defaults matching a local sshd.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RelayError;
use crate::proxy::{DialerConfig, FramerConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Certificate and key for the wss upgrade path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Relay configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,

    /// Upstream target and connect timeout.
    pub dialer: DialerConfig,

    /// Handshake sniffing limits.
    pub framer: FramerConfig,

    /// Optional inbound TLS material.
    pub tls: Option<TlsFiles>,

    /// Write the consumed handshake bytes to the upstream before relaying.
    pub forward_handshake: bool,

    /// Upper bound on waiting for in-flight sessions after shutdown.
    /// `None` waits until every session ends on its own.
    pub drain_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration for `port` from environment variables.
    pub fn from_env(port: u16) -> Result<Self, RelayError> {
        Self::from_lookup(port, |key| std::env::var(key).ok())
    }

    /// Load configuration using an arbitrary variable lookup.
    pub fn from_lookup<F>(port: u16, lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if port == 0 {
            return Err(RelayError::Config("port must be between 1 and 65535".into()));
        }

        let bind_ip: IpAddr = match lookup("RELAY_BIND_ADDR") {
            Some(v) => v
                .parse()
                .map_err(|_| RelayError::Config(format!("RELAY_BIND_ADDR is not an IP: {v}")))?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let mut dialer = DialerConfig::default();
        if let Some(host) = lookup("RELAY_UPSTREAM_HOST") {
            if host.trim().is_empty() {
                return Err(RelayError::Config("RELAY_UPSTREAM_HOST is empty".into()));
            }
            dialer.host = host;
        }
        if let Some(p) = parse_var::<u16>(&lookup, "RELAY_UPSTREAM_PORT")? {
            if p == 0 {
                return Err(RelayError::Config("RELAY_UPSTREAM_PORT must not be 0".into()));
            }
            dialer.port = p;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "RELAY_CONNECT_TIMEOUT_MS")? {
            dialer.connect_timeout = Duration::from_millis(ms.max(1));
        }

        let mut framer = FramerConfig::default();
        if let Some(ms) = parse_var::<u64>(&lookup, "RELAY_SNIFF_TIMEOUT_MS")? {
            framer.timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(max) = parse_var::<usize>(&lookup, "RELAY_MAX_HEADER_BYTES")? {
            framer.max_header_bytes = max.max(framer.initial_read);
        }

        let tls = match (lookup("RELAY_TLS_CERT"), lookup("RELAY_TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(RelayError::Config(
                    "RELAY_TLS_CERT and RELAY_TLS_KEY must be set together".into(),
                ))
            }
        };

        let forward_handshake = lookup("RELAY_FORWARD_HANDSHAKE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let drain_timeout =
            parse_var::<u64>(&lookup, "RELAY_DRAIN_TIMEOUT_SECS")?.map(Duration::from_secs);

        let log_level = lookup("RELAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_format = match lookup("RELAY_LOG_FORMAT").as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("text") => LogFormat::Text,
            Some(other) => {
                return Err(RelayError::Config(format!(
                    "RELAY_LOG_FORMAT must be json or text, got {other}"
                )))
            }
        };

        Ok(Self {
            bind_addr: SocketAddr::new(bind_ip, port),
            dialer,
            framer,
            tls,
            forward_handshake,
            drain_timeout,
            log_level,
            log_format,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RelayError> {
    lookup(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| RelayError::Config(format!("{key} must be an integer, got {v}")))
        })
        .transpose()
}
