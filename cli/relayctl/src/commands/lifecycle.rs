//! Start, stop, list, status and prune.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::manager::{Closed, Manager, StopOptions, DEFAULT_GRACE};
use crate::output::{print_output, print_single, print_success, print_warning, OutputFormat};
use crate::supervisor::Supervisor;

/// Start a relay on a port.
#[derive(Debug, Args)]
pub struct StartCommand {
    /// Port the relay listens on.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

impl StartCommand {
    pub fn run<S: Supervisor>(self, manager: &mut Manager<S>, format: OutputFormat) -> Result<ExitCode> {
        let pid = manager.open(self.port)?;

        match format {
            OutputFormat::Json => print_single(&serde_json::json!({
                "port": self.port,
                "pid": pid,
                "status": "started",
            })),
            OutputFormat::Table => print_success(&format!(
                "Started proxy on port {} with PID {}",
                self.port, pid
            )),
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Stop the relay on a port.
#[derive(Debug, Args)]
pub struct StopCommand {
    /// Port of the relay to stop.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Send SIGKILL if the relay is still alive after the grace period.
    #[arg(long)]
    force: bool,

    /// Seconds to wait for the relay to exit after SIGTERM.
    #[arg(long, default_value_t = DEFAULT_GRACE.as_secs())]
    grace: u64,
}

impl StopCommand {
    pub fn run<S: Supervisor>(self, manager: &mut Manager<S>, format: OutputFormat) -> Result<ExitCode> {
        let closed = manager.close(
            self.port,
            StopOptions {
                force: self.force,
                grace: Duration::from_secs(self.grace),
            },
        )?;

        let status = match closed {
            Closed::Terminated { .. } => "stopped",
            Closed::Killed { .. } => "killed",
            Closed::Draining { .. } => "draining",
            Closed::Stale { .. } => "stale",
        };

        match format {
            OutputFormat::Json => print_single(&serde_json::json!({
                "port": self.port,
                "pid": closed.pid(),
                "status": status,
            })),
            OutputFormat::Table => match closed {
                Closed::Stale { pid } => print_warning(&format!(
                    "Proxy on port {} (PID {}) was not running; entry removed",
                    self.port, pid
                )),
                Closed::Draining { pid } => print_warning(&format!(
                    "Proxy on port {} (PID {}) is still draining sessions; \
                     run `relayctl stop {}` again to drop them, or pass --force",
                    self.port, pid, self.port
                )),
                Closed::Killed { pid } => print_success(&format!(
                    "Killed proxy on port {} with PID {}",
                    self.port, pid
                )),
                Closed::Terminated { pid } => print_success(&format!(
                    "Stopped proxy on port {} with PID {}",
                    self.port, pid
                )),
            },
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Show whether a port has a running relay.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Port to check.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

#[derive(Debug, Serialize)]
struct StatusView {
    port: u16,
    registered: bool,
    pid: Option<u32>,
    alive: bool,
}

impl StatusCommand {
    pub fn run<S: Supervisor>(self, manager: &Manager<S>, format: OutputFormat) -> Result<ExitCode> {
        let instance = manager.status(self.port);
        let view = StatusView {
            port: self.port,
            registered: instance.is_some(),
            pid: instance.as_ref().map(|i| i.pid),
            alive: instance.as_ref().is_some_and(|i| i.alive),
        };

        match format {
            OutputFormat::Json => print_single(&view),
            OutputFormat::Table => match &instance {
                Some(i) if i.alive => println!("Port {}: running (PID {})", i.port, i.pid),
                Some(i) => println!(
                    "Port {}: registered to PID {} but not running (run `relayctl prune`)",
                    i.port, i.pid
                ),
                None => println!("Port {}: not open", self.port),
            },
        }

        Ok(if view.alive {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }
}

pub fn list<S: Supervisor>(manager: &Manager<S>, format: OutputFormat) -> Result<ExitCode> {
    print_output(&manager.list(), format, "No open proxy ports.");
    if format == OutputFormat::Table {
        let path = manager.registry().path().display().to_string();
        println!("{}", format!("Registry: {path}").dimmed());
    }
    Ok(ExitCode::SUCCESS)
}

pub fn prune<S: Supervisor>(manager: &mut Manager<S>, format: OutputFormat) -> Result<ExitCode> {
    let dropped = manager.prune()?;

    match format {
        OutputFormat::Json => print_single(&dropped),
        OutputFormat::Table if dropped.is_empty() => println!("Nothing to prune."),
        OutputFormat::Table => {
            for instance in &dropped {
                print_success(&format!(
                    "Removed stale entry for port {} (PID {})",
                    instance.port, instance.pid
                ));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
