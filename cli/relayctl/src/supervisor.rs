//! Relay process control.
//!
//! Each relay runs detached in its own session so it outlives the shell
//! that started it. Stopping signals the whole process group.
//!
//! Relays started by this process stay our children until they are reaped,
//! so their `Child` handles are kept and `is_alive` reaps through them. A
//! relay that exited would otherwise linger as a zombie and still answer
//! `kill(pid, 0)`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use crate::error::CtlError;

/// How long a fresh relay must survive before it counts as started.
pub const SETTLE_PERIOD: Duration = Duration::from_secs(1);

/// Signal used to stop a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Kill,
}

impl From<StopSignal> for Signal {
    fn from(signal: StopSignal) -> Self {
        match signal {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        }
    }
}

/// Result of signalling a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No such process; the registry entry was stale.
    Gone,
}

/// Starts, signals and probes relay processes.
pub trait Supervisor {
    /// Launch a relay on `port`, returning its PID once it has settled.
    fn spawn(&self, port: u16) -> Result<u32>;

    /// Send `signal` to the relay's process group (or the PID alone).
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<Delivery>;

    /// Whether `pid` names a live process.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Supervisor for real OS processes.
#[derive(Debug)]
pub struct ProcessSupervisor {
    relay_bin: PathBuf,
    log_dir: PathBuf,
    settle: Duration,
    /// Relays spawned by this process that have not been reaped yet.
    children: RefCell<HashMap<u32, Child>>,
}

impl ProcessSupervisor {
    pub fn new(relay_bin: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            relay_bin,
            log_dir,
            settle: SETTLE_PERIOD,
            children: RefCell::new(HashMap::new()),
        }
    }

    /// Log file for the relay on `port`.
    pub fn log_path(&self, port: u16) -> PathBuf {
        self.log_dir.join(format!("proxy_{port}.log"))
    }
}

impl Supervisor for ProcessSupervisor {
    fn spawn(&self, port: u16) -> Result<u32> {
        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("Failed to create log directory: {}", self.log_dir.display()))?;

        let log_path = self.log_path(port);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;
        let log_err = log.try_clone().context("Failed to duplicate log handle")?;

        let mut cmd = Command::new(&self.relay_bin);
        cmd.arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err);

        // New session: no controlling terminal, and the relay leads its own
        // process group so stop can signal the group.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|source| CtlError::Spawn {
            bin: self.relay_bin.clone(),
            source,
        })?;

        thread::sleep(self.settle);

        match child.try_wait().context("Failed to check relay status")? {
            Some(status) => Err(CtlError::ExitedEarly {
                port,
                status: status.to_string(),
                log: log_path,
            }
            .into()),
            None => {
                let pid = child.id();
                self.children.borrow_mut().insert(pid, child);
                Ok(pid)
            }
        }
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<Delivery> {
        let Some(target) = to_pid(pid) else {
            return Ok(Delivery::Gone);
        };
        let signal = Signal::from(signal);

        let result = match killpg(target, signal) {
            // Not a group leader (or the group is gone): try the PID itself.
            Err(Errno::ESRCH) | Err(Errno::EPERM) => kill(target, signal),
            other => other,
        };

        match result {
            Ok(()) => Ok(Delivery::Delivered),
            Err(Errno::ESRCH) => Ok(Delivery::Gone),
            Err(source) => Err(CtlError::Signal { pid, source }.into()),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let mut children = self.children.borrow_mut();
        if let Some(child) = children.get_mut(&pid) {
            return match child.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) | Err(_) => {
                    children.remove(&pid);
                    false
                }
            };
        }
        drop(children);

        match to_pid(pid) {
            Some(target) => matches!(kill(target, None), Ok(()) | Err(Errno::EPERM)),
            None => false,
        }
    }
}

/// PIDs 0 and 1 and anything past `i32::MAX` never name a relay; signalling
/// them would hit our own group, init, or a process group by accident.
fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 1 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("relay");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn supervisor(bin: PathBuf, log_dir: PathBuf) -> ProcessSupervisor {
        ProcessSupervisor {
            relay_bin: bin,
            log_dir,
            settle: Duration::from_millis(200),
            children: RefCell::new(HashMap::new()),
        }
    }

    fn wait_dead(sup: &ProcessSupervisor, pid: u32) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while std::time::Instant::now() < deadline {
            if !sup.is_alive(pid) {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn test_pid_guard() {
        assert!(to_pid(0).is_none());
        assert!(to_pid(1).is_none());
        assert!(to_pid(u32::MAX).is_none());
        assert_eq!(to_pid(4242), Some(Pid::from_raw(4242)));
    }

    #[test]
    fn test_current_process_is_alive() {
        let sup = supervisor(PathBuf::from("relay"), PathBuf::from("."));
        assert!(sup.is_alive(std::process::id()));
        assert!(!sup.is_alive(0));
    }

    #[test]
    fn test_spawn_logs_and_stop() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "echo \"listening on $1\"\nexec sleep 30");
        let sup = supervisor(bin, dir.path().join("logs"));

        let pid = sup.spawn(8081).unwrap();
        assert!(sup.is_alive(pid));

        assert_eq!(sup.signal(pid, StopSignal::Terminate).unwrap(), Delivery::Delivered);

        let log = fs::read_to_string(sup.log_path(8081)).unwrap();
        assert!(log.contains("listening on 8081"));
    }

    #[test]
    fn test_terminated_child_is_reaped() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "exec sleep 30");
        let sup = supervisor(bin, dir.path().to_path_buf());

        let pid = sup.spawn(8084).unwrap();
        assert!(sup.is_alive(pid));

        assert_eq!(sup.signal(pid, StopSignal::Terminate).unwrap(), Delivery::Delivered);
        assert!(wait_dead(&sup, pid), "terminated relay still reported alive");
        assert!(sup.children.borrow().is_empty());

        // Reaped and released: signalling again finds nothing.
        assert_eq!(sup.signal(pid, StopSignal::Terminate).unwrap(), Delivery::Gone);
    }

    #[test]
    fn test_crashed_child_is_not_alive() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "sleep 0.5\nexit 1");
        let sup = supervisor(bin, dir.path().to_path_buf());

        let pid = sup.spawn(8085).unwrap();
        assert!(wait_dead(&sup, pid), "exited relay still reported alive");
    }

    #[test]
    fn test_spawn_reports_early_exit() {
        let dir = tempdir().unwrap();
        let bin = script(dir.path(), "echo bind failed >&2\nexit 3");
        let sup = supervisor(bin, dir.path().to_path_buf());

        let err = sup.spawn(8082).unwrap_err();
        let ctl = err.downcast_ref::<CtlError>().unwrap();
        assert_eq!(ctl.reason_code(), "exited_early");

        let log = fs::read_to_string(sup.log_path(8082)).unwrap();
        assert!(log.contains("bind failed"));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let dir = tempdir().unwrap();
        let sup = supervisor(dir.path().join("no-such-relay"), dir.path().to_path_buf());

        let err = sup.spawn(8083).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CtlError>().unwrap().reason_code(),
            "spawn_failed"
        );
    }
}
