//! Registry of relay instances started by relayctl.
//!
//! The file is a flat JSON object from port to PID, e.g. `{"8080": 4242}`.
//! It is read whole and rewritten whole (temp file + rename) on every
//! mutation. An entry only says a relay was started; whether the PID is still
//! alive is the supervisor's call.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Default registry file name.
pub const REGISTRY_FILE: &str = "running_proxies.json";

/// Port -> PID map backed by a JSON file.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    entries: BTreeMap<u16, u32>,
}

impl Registry {
    /// Load the registry at `path`. A missing or empty file is an empty
    /// registry; a malformed one is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read registry: {}", path.display()))?;

        let entries = if content.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse registry: {}", path.display()))?
        };

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, port: u16) -> Option<u32> {
        self.entries.get(&port).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending port order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u32)> + '_ {
        self.entries.iter().map(|(port, pid)| (*port, *pid))
    }

    /// Record `port -> pid` and persist.
    pub fn insert(&mut self, port: u16, pid: u32) -> Result<()> {
        self.entries.insert(port, pid);
        self.save()
    }

    /// Drop `port` and persist. Returns the PID it was mapped to.
    pub fn remove(&mut self, port: u16) -> Result<Option<u32>> {
        let pid = self.entries.remove(&port);
        if pid.is_some() {
            self.save()?;
        }
        Ok(pid)
    }

    /// Drop every entry `keep` rejects and persist. Returns the dropped ones.
    pub fn retain<F>(&mut self, mut keep: F) -> Result<Vec<(u16, u32)>>
    where
        F: FnMut(u16, u32) -> bool,
    {
        let mut dropped = Vec::new();
        self.entries.retain(|port, pid| {
            let kept = keep(*port, *pid);
            if !kept {
                dropped.push((*port, *pid));
            }
            kept
        });
        if !dropped.is_empty() {
            self.save()?;
        }
        Ok(dropped)
    }

    /// Save the registry atomically.
    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(&self.entries).context("Failed to serialize registry")?;

        fs::write(&tmp_path, &content)
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;

        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let registry = Registry::load(dir.path().join(REGISTRY_FILE)).unwrap();
        assert!(registry.is_empty());
        assert!(!registry.path().exists());
    }

    #[test]
    fn test_roundtrip_uses_string_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join(REGISTRY_FILE);

        let mut registry = Registry::load(&path).unwrap();
        registry.insert(8080, 4242).unwrap();
        registry.insert(443, 99).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"443": 99, "8080": 4242}));

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.iter().collect::<Vec<_>>(), vec![(443, 99), (8080, 4242)]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_reads_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        fs::write(&path, r#"{"2222": 31337}"#).unwrap();

        let registry = Registry::load(&path).unwrap();
        assert_eq!(registry.get(2222), Some(31337));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_file_is_empty_registry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        fs::write(&path, "\n").unwrap();
        assert!(Registry::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);
        fs::write(&path, "{not json").unwrap();

        let err = Registry::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse registry"));
    }

    #[test]
    fn test_remove_and_retain_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REGISTRY_FILE);

        let mut registry = Registry::load(&path).unwrap();
        registry.insert(1, 10).unwrap();
        registry.insert(2, 20).unwrap();
        registry.insert(3, 30).unwrap();

        assert_eq!(registry.remove(2).unwrap(), Some(20));
        assert_eq!(registry.remove(2).unwrap(), None);

        let dropped = registry.retain(|_, pid| pid != 30).unwrap();
        assert_eq!(dropped, vec![(3, 30)]);

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.iter().collect::<Vec<_>>(), vec![(1, 10)]);
    }
}
