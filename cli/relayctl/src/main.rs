//! relayctl - lifecycle manager for sshbridge relays.
//!
//! Starts one detached `relay` process per port, records `port -> pid` in a
//! JSON registry, and stops relays by signalling their process group.

use std::process::ExitCode;

use clap::Parser;

mod commands;
mod config;
mod error;
mod manager;
mod output;
mod registry;
mod supervisor;

use commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.run() {
        Ok(code) => code,
        Err(e) => {
            error::print_error(&e);
            ExitCode::FAILURE
        }
    }
}
