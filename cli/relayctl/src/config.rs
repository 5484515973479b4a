//! Where relayctl keeps its files and finds the relay binary.

use std::env;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::registry::REGISTRY_FILE;

/// Relay binary name.
pub const RELAY_BIN: &str = "relay";

/// Resolved locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Registry file.
    pub registry: PathBuf,
    /// Directory for `proxy_<port>.log` files.
    pub log_dir: PathBuf,
    /// Relay executable.
    pub relay_bin: PathBuf,
}

impl Paths {
    /// Resolve paths, preferring explicit values over defaults.
    pub fn resolve(
        registry: Option<PathBuf>,
        log_dir: Option<PathBuf>,
        relay_bin: Option<PathBuf>,
    ) -> Self {
        let data_dir = data_dir();
        Self {
            registry: registry.unwrap_or_else(|| data_dir.join(REGISTRY_FILE)),
            log_dir: log_dir.unwrap_or(data_dir),
            relay_bin: relay_bin.unwrap_or_else(default_relay_bin),
        }
    }
}

/// Platform data directory, or the current directory when there is none.
fn data_dir() -> PathBuf {
    ProjectDirs::from("com", "sshbridge", "relayctl")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `relay` installed next to this executable, else `relay` from PATH.
fn default_relay_bin() -> PathBuf {
    env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .map(|dir| dir.join(RELAY_BIN))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(RELAY_BIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_paths_win() {
        let paths = Paths::resolve(
            Some(PathBuf::from("/tmp/r.json")),
            Some(PathBuf::from("/tmp/logs")),
            Some(PathBuf::from("/opt/relay")),
        );
        assert_eq!(paths.registry, PathBuf::from("/tmp/r.json"));
        assert_eq!(paths.log_dir, PathBuf::from("/tmp/logs"));
        assert_eq!(paths.relay_bin, PathBuf::from("/opt/relay"));
    }

    #[test]
    fn test_defaults_share_the_data_dir() {
        let paths = Paths::resolve(None, None, None);
        assert_eq!(paths.registry.file_name().unwrap(), REGISTRY_FILE);
        assert_eq!(paths.registry.parent().unwrap(), paths.log_dir);
        assert_eq!(paths.relay_bin.file_name().unwrap(), RELAY_BIN);
    }
}
