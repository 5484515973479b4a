//! sshbridge relay
//!
//! Single-port TCP relay in front of a local SSH daemon.
//!
//! This service:
//! - Accepts TCP connections on one port
//! - Classifies each connection from its first bytes (SOCKS-like or HTTP-like)
//! - Writes a fixed greeting, upgrading wss requests to TLS when configured
//! - Relays bytes to the upstream until either side closes
//! - On SIGTERM/SIGINT, stops accepting and lets in-flight sessions drain

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use sshbridge_relay::{logging, tls, Config, Listener, ListenerConfig, Responder};

/// Protocol-sniffing relay to a local SSH daemon.
#[derive(Debug, Parser)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            // Argument errors exit 1 like every other startup failure.
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    let config = Config::from_env(cli.port).context("Invalid configuration")?;
    logging::init(&config.log_level, config.log_format);

    info!("Starting sshbridge relay");
    info!(
        bind_addr = %config.bind_addr,
        upstream = %config.dialer.target(),
        sniff_timeout_ms = config.framer.timeout.as_millis() as u64,
        tls = config.tls.is_some(),
        forward_handshake = config.forward_handshake,
        "Configuration loaded"
    );

    let responder = match &config.tls {
        Some(files) => Responder::with_tls(tls::load_acceptor(files)?, config.framer.timeout),
        None => Responder::plain(),
    };

    let listener = Listener::bind(ListenerConfig::from_config(&config), responder).await?;
    let stats = listener.stats();

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    let sessions = listener
        .run(async {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        })
        .await;

    if !sessions.is_empty() {
        info!(
            in_flight = sessions.len(),
            drain_timeout_secs = config.drain_timeout.map(|d| d.as_secs()),
            "Draining sessions"
        );
        tokio::select! {
            aborted = sessions.drain(config.drain_timeout) => {
                if aborted > 0 {
                    warn!(aborted = aborted, "Drain timeout reached, sessions aborted");
                }
            }
            _ = sigterm.recv() => warn!("Second signal received, aborting sessions"),
            _ = sigint.recv() => warn!("Second signal received, aborting sessions"),
        }
    }

    let snapshot = stats.snapshot();
    info!(
        connections_accepted = snapshot.connections_accepted,
        upstream_connected = snapshot.upstream_connected,
        upstream_failed = snapshot.upstream_failed,
        bytes_to_upstream = snapshot.bytes_to_upstream,
        bytes_to_client = snapshot.bytes_to_client,
        "Relay stopped"
    );

    Ok(())
}
