pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod tls;

pub use config::{Config, LogFormat, TlsFiles};
pub use error::RelayError;
pub use proxy::{
    Classification, ClientStream, DialerConfig, Framer, FramerConfig, Greeting, Handshake,
    Listener, ListenerConfig, ListenerStats, PrefixedStream, RelayOutcome, Responder, Sessions,
    Side, StatsSnapshot, Termination, UpstreamDialer,
};
