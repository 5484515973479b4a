//! CLI commands.

mod lifecycle;
mod menu;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Paths;
use crate::manager::Manager;
use crate::output::OutputFormat;
use crate::registry::Registry;
use crate::supervisor::ProcessSupervisor;

/// relayctl - start, stop and list sshbridge relays, one per port.
#[derive(Debug, Parser)]
#[command(name = "relayctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Registry file mapping ports to relay PIDs.
    #[arg(long, global = true, env = "RELAYCTL_REGISTRY")]
    registry: Option<PathBuf>,

    /// Directory for relay log files.
    #[arg(long, global = true, env = "RELAYCTL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Relay executable to launch.
    #[arg(long, global = true, env = "RELAYCTL_RELAY_BIN")]
    relay_bin: Option<PathBuf>,

    /// Defaults to the interactive menu.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a relay on a port.
    Start(lifecycle::StartCommand),

    /// Stop the relay on a port.
    Stop(lifecycle::StopCommand),

    /// List registered relays.
    List,

    /// Show whether a port has a running relay.
    Status(lifecycle::StatusCommand),

    /// Drop registry entries whose process is gone.
    Prune,

    /// Interactive menu.
    Menu,
}

impl Cli {
    /// Run the CLI command.
    pub fn run(self) -> Result<ExitCode> {
        let paths = Paths::resolve(self.registry, self.log_dir, self.relay_bin);
        let registry = Registry::load(&paths.registry)?;
        let supervisor = ProcessSupervisor::new(paths.relay_bin, paths.log_dir);
        let mut manager = Manager::new(registry, supervisor);

        match self.command.unwrap_or(Commands::Menu) {
            Commands::Start(cmd) => cmd.run(&mut manager, self.format),
            Commands::Stop(cmd) => cmd.run(&mut manager, self.format),
            Commands::List => lifecycle::list(&manager, self.format),
            Commands::Status(cmd) => cmd.run(&manager, self.format),
            Commands::Prune => lifecycle::prune(&mut manager, self.format),
            Commands::Menu => {
                let stdin = io::stdin();
                menu::run(&mut manager, stdin.lock(), io::stdout())?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
