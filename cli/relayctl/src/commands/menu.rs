//! Interactive menu over stdin.
//!
//! ```text
//! 1. Open port
//! 2. Close port
//! 3. List open ports
//! 4. Exit
//! ```
//!
//! EOF on input exits like option 4. Failures are reported and the menu
//! keeps going.

use std::io::{BufRead, Write};

use anyhow::Result;

use crate::error::parse_port;
use crate::manager::{Closed, Manager, StopOptions};
use crate::supervisor::Supervisor;

pub fn run<S, R, W>(manager: &mut Manager<S>, mut input: R, mut out: W) -> Result<()>
where
    S: Supervisor,
    R: BufRead,
    W: Write,
{
    loop {
        writeln!(out, "\nProxy Manager Menu")?;
        writeln!(out, "==================")?;
        writeln!(out, "1. Open port")?;
        writeln!(out, "2. Close port")?;
        writeln!(out, "3. List open ports")?;
        writeln!(out, "4. Exit")?;

        let Some(choice) = prompt(&mut input, &mut out, "Choose an option: ")? else {
            writeln!(out)?;
            return Ok(());
        };

        match choice.as_str() {
            "1" => {
                let Some(raw) = prompt(&mut input, &mut out, "Enter port number to open proxy: ")?
                else {
                    return Ok(());
                };
                let port = match parse_port(&raw) {
                    Ok(port) => port,
                    Err(_) => {
                        writeln!(out, "Invalid port number.")?;
                        continue;
                    }
                };
                match manager.open(port) {
                    Ok(pid) => writeln!(out, "Started proxy on port {port} with PID {pid}")?,
                    Err(e) => writeln!(out, "Error: {e:#}")?,
                }
            }
            "2" => {
                let Some(raw) = prompt(&mut input, &mut out, "Enter port number to close proxy: ")?
                else {
                    return Ok(());
                };
                let port = match parse_port(&raw) {
                    Ok(port) => port,
                    Err(_) => {
                        writeln!(out, "Invalid port number.")?;
                        continue;
                    }
                };
                match manager.close(port, StopOptions::default()) {
                    Ok(Closed::Stale { pid }) => writeln!(
                        out,
                        "Proxy on port {port} (PID {pid}) was not running; entry removed"
                    )?,
                    Ok(Closed::Draining { pid }) => writeln!(
                        out,
                        "Proxy on port {port} (PID {pid}) is still draining sessions; \
                         close it again to drop them"
                    )?,
                    Ok(closed) => writeln!(
                        out,
                        "Stopped proxy on port {port} with PID {}",
                        closed.pid()
                    )?,
                    Err(e) => writeln!(out, "Error: {e:#}")?,
                }
            }
            "3" => {
                let instances = manager.list();
                if instances.is_empty() {
                    writeln!(out, "No open proxy ports.")?;
                } else {
                    writeln!(out, "Open proxy ports and PIDs:")?;
                    for i in instances {
                        let note = if i.alive { "" } else { " (not running)" };
                        writeln!(out, "  Port {} -> PID {}{}", i.port, i.pid, note)?;
                    }
                }
            }
            "4" => {
                writeln!(out, "Exiting Proxy Manager.")?;
                return Ok(());
            }
            _ => writeln!(out, "Invalid choice. Please enter 1, 2, 3 or 4.")?,
        }
    }
}

/// Print `label` and read one trimmed line. `None` on EOF.
fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, label: &str) -> Result<Option<String>> {
    write!(out, "{label}")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
