//! Error handling and display for relayctl.

use std::path::PathBuf;

use colored::Colorize;
use thiserror::Error;

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum CtlError {
    #[error("Invalid port: {0} (expected 1-65535)")]
    InvalidPort(String),

    #[error("Port {port} is already open (PID {pid})")]
    AlreadyOpen { port: u16, pid: u32 },

    #[error("Port {0} is not currently open")]
    NotOpen(u16),

    #[error("Failed to launch relay binary {}", .bin.display())]
    Spawn {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Relay on port {port} exited during startup ({status})")]
    ExitedEarly {
        port: u16,
        status: String,
        log: PathBuf,
    },

    #[error("Failed to signal PID {pid}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },
}

impl CtlError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            CtlError::InvalidPort(_) => "invalid_port",
            CtlError::AlreadyOpen { .. } => "already_open",
            CtlError::NotOpen(_) => "not_open",
            CtlError::Spawn { .. } => "spawn_failed",
            CtlError::ExitedEarly { .. } => "exited_early",
            CtlError::Signal { .. } => "signal_failed",
        }
    }
}

/// Parse a port argument, accepting 1-65535.
pub fn parse_port(raw: &str) -> Result<u16, CtlError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(CtlError::InvalidPort(raw.trim().to_string())),
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(ctl_err) = err.downcast_ref::<CtlError>() {
        match ctl_err {
            CtlError::AlreadyOpen { port, .. } => {
                eprintln!(
                    "\n{}",
                    format!("Hint: Run `relayctl stop {port}` first.").yellow()
                );
            }
            CtlError::NotOpen(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Run `relayctl list` to see open ports.".yellow()
                );
            }
            CtlError::Spawn { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: Point --relay-bin (or RELAYCTL_RELAY_BIN) at the relay binary."
                        .yellow()
                );
            }
            CtlError::ExitedEarly { log, .. } => {
                eprintln!("\nLog: {}", log.display());
            }
            _ => {}
        }
    }
}
