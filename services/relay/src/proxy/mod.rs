//! Protocol-sniffing TCP relay.
//!
//! This module provides:
//! - Handshake classification from the first bytes of a connection
//! - Fixed greetings, with an optional TLS upgrade for wss requests
//! - Upstream dialing to a single fixed target
//! - Bidirectional relaying with paired teardown
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Framer -> Responder -> Dialer -> Relay <-> Upstream
//!                                    |
//!                          TLS upgrade (wss only)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{Listener, ListenerConfig, Responder};
//!
//! let config = ListenerConfig::new("0.0.0.0:8080".parse()?);
//! let listener = Listener::bind(config, Responder::plain()).await?;
//! let sessions = listener.run(shutdown_signal()).await;
//! sessions.drain(None).await;
//! ```

mod dialer;
mod framer;
mod handshake;
mod listener;
mod relay;
mod stream;

pub use dialer::{DialerConfig, UpstreamDialer};
pub use framer::{Classification, Framer, FramerConfig, Handshake};
pub use handshake::{Greeting, Responder, OK, SWITCHING_PROTOCOLS};
pub use listener::{Listener, ListenerConfig, ListenerStats, Sessions, StatsSnapshot};
pub use relay::{relay, RelayOutcome, Side, Termination, RELAY_BUFFER_SIZE};
pub use stream::{ClientStream, PrefixedStream};
