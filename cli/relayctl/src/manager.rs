//! Open, close and inspect relay instances.
//!
//! Every mutation goes through the registry immediately, so a crashed
//! relayctl never leaves in-memory state behind.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::error::CtlError;
use crate::registry::Registry;
use crate::supervisor::{Delivery, StopSignal, Supervisor};

/// Poll interval while waiting for a relay to exit.
const EXIT_POLL: Duration = Duration::from_millis(100);

/// Default wait for a relay to exit after SIGTERM.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// A registered relay and whether its process is alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct Instance {
    #[tabled(rename = "PORT")]
    pub port: u16,
    #[tabled(rename = "PID")]
    pub pid: u32,
    #[tabled(rename = "ALIVE")]
    pub alive: bool,
}

/// Stop behavior.
#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    /// Escalate to SIGKILL when the relay outlives the grace period.
    pub force: bool,
    /// How long to wait for the relay to exit after SIGTERM.
    pub grace: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            force: false,
            grace: DEFAULT_GRACE,
        }
    }
}

/// How a close went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// Relay exited after SIGTERM.
    Terminated { pid: u32 },
    /// Relay outlived the grace period and was killed.
    Killed { pid: u32 },
    /// Relay is still draining sessions after the grace period. The entry is
    /// kept; closing again delivers a second SIGTERM, which aborts the drain.
    Draining { pid: u32 },
    /// Process was already gone; the entry was stale.
    Stale { pid: u32 },
}

impl Closed {
    pub fn pid(&self) -> u32 {
        match self {
            Closed::Terminated { pid }
            | Closed::Killed { pid }
            | Closed::Draining { pid }
            | Closed::Stale { pid } => *pid,
        }
    }
}

/// Registry plus the supervisor that acts on it.
pub struct Manager<S> {
    registry: Registry,
    supervisor: S,
}

impl<S: Supervisor> Manager<S> {
    pub fn new(registry: Registry, supervisor: S) -> Self {
        Self {
            registry,
            supervisor,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Start a relay on `port` and register it.
    pub fn open(&mut self, port: u16) -> Result<u32> {
        if let Some(pid) = self.registry.get(port) {
            return Err(CtlError::AlreadyOpen { port, pid }.into());
        }

        let pid = self.supervisor.spawn(port)?;
        self.registry.insert(port, pid)?;
        Ok(pid)
    }

    /// Stop the relay on `port`.
    ///
    /// The entry is removed once the process is gone. A relay still alive
    /// after `grace` is killed with `force`, otherwise it stays registered
    /// as [`Closed::Draining`].
    pub fn close(&mut self, port: u16, options: StopOptions) -> Result<Closed> {
        let Some(pid) = self.registry.get(port) else {
            return Err(CtlError::NotOpen(port).into());
        };

        let closed = match self.supervisor.signal(pid, StopSignal::Terminate)? {
            Delivery::Gone => Closed::Stale { pid },
            Delivery::Delivered if self.wait_for_exit(pid, options.grace) => {
                Closed::Terminated { pid }
            }
            Delivery::Delivered if options.force => {
                match self.supervisor.signal(pid, StopSignal::Kill)? {
                    Delivery::Delivered => Closed::Killed { pid },
                    Delivery::Gone => Closed::Terminated { pid },
                }
            }
            Delivery::Delivered => return Ok(Closed::Draining { pid }),
        };

        self.registry.remove(port)?;
        Ok(closed)
    }

    /// Every registered relay, in port order.
    pub fn list(&self) -> Vec<Instance> {
        self.registry
            .iter()
            .map(|(port, pid)| self.instance(port, pid))
            .collect()
    }

    /// The relay registered on `port`, if any.
    pub fn status(&self, port: u16) -> Option<Instance> {
        self.registry.get(port).map(|pid| self.instance(port, pid))
    }

    /// Unregister relays whose process is gone.
    pub fn prune(&mut self) -> Result<Vec<Instance>> {
        let supervisor = &self.supervisor;
        let dropped = self.registry.retain(|_, pid| supervisor.is_alive(pid))?;
        Ok(dropped
            .into_iter()
            .map(|(port, pid)| Instance {
                port,
                pid,
                alive: false,
            })
            .collect())
    }

    fn instance(&self, port: u16, pid: u32) -> Instance {
        Instance {
            port,
            pid,
            alive: self.supervisor.is_alive(pid),
        }
    }

    fn wait_for_exit(&self, pid: u32, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if !self.supervisor.is_alive(pid) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL.min(deadline - now));
        }
    }
}
