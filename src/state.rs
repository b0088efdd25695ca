//! Install state tracker: the single mutation point for receipts.
//!
//! Receipts live at `<receipts>/<name>.json`. A commit writes a temp file in
//! the same directory, fsyncs it, then renames it over the final path, so a
//! crash leaves either the old receipt, the new one, or none, never a torn
//! file. Commits for one formula name are serialised by a per-name lock;
//! different names commit concurrently.

use crate::error::{KegError, Result};
use crate::receipt::InstallReceipt;
use anyhow::Context;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub struct InstallState {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InstallState {
    /// Open (creating if needed) the receipt directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create receipt directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Atomically commit a receipt, replacing any previous one for the formula
    pub fn record(&self, receipt: &InstallReceipt) -> Result<()> {
        let lock = self.lock_for(&receipt.name);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let json = receipt.to_json()?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;

        let path = self.path_for(&receipt.name);
        tmp.persist(&path).map_err(|e| KegError::Io(e.error))?;
        debug!("Committed receipt for {} {}", receipt.name, receipt.version);
        Ok(())
    }

    /// Receipt for `name`, if one was committed and is readable
    pub fn query(&self, name: &str) -> Result<Option<InstallReceipt>> {
        read_receipt(&self.path_for(name))
    }

    /// Delete the receipt for `name`, returning what was removed
    pub fn remove(&self, name: &str) -> Result<Option<InstallReceipt>> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = self.path_for(name);
        let existing = read_receipt(&path)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(existing),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable receipts, sorted by formula name
    pub fn list(&self) -> Result<Vec<InstallReceipt>> {
        let paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();

        let mut receipts: Vec<InstallReceipt> = paths
            .par_iter()
            .filter_map(|p| read_receipt(p).ok().flatten())
            .collect();
        receipts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(receipts)
    }

    /// Name -> receipt map used by the resolver
    pub fn snapshot(&self) -> Result<BTreeMap<String, InstallReceipt>> {
        Ok(self
            .list()?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect())
    }

    /// Installed formulae whose receipts list `name` as a runtime dependency
    pub fn dependents(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.name != name && r.depends_on(name))
            .map(|r| r.name)
            .collect())
    }
}

fn read_receipt(path: &Path) -> Result<Option<InstallReceipt>> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match InstallReceipt::from_json(&text) {
        Ok(r) => Ok(Some(r)),
        Err(e) => {
            warn!("Ignoring unreadable receipt {}: {:#}", path.display(), e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::{Method, RuntimeDependency};

    fn state() -> (tempfile::TempDir, InstallState) {
        let dir = tempfile::tempdir().unwrap();
        let state = InstallState::open(dir.path().join("receipts")).unwrap();
        (dir, state)
    }

    #[test]
    fn test_record_query_remove() {
        let (_dir, state) = state();
        assert!(state.query("zstd").unwrap().is_none());

        let receipt = InstallReceipt::new("zstd", "1.5.0", Method::Source, vec![]);
        state.record(&receipt).unwrap();
        assert_eq!(state.query("zstd").unwrap().unwrap().version, "1.5.0");

        let removed = state.remove("zstd").unwrap();
        assert!(removed.is_some());
        assert!(state.query("zstd").unwrap().is_none());
        assert!(state.remove("zstd").unwrap().is_none());
    }

    #[test]
    fn test_record_replaces() {
        let (_dir, state) = state();
        state
            .record(&InstallReceipt::new("gmp", "6.2.0", Method::Bottle, vec![]))
            .unwrap();
        state
            .record(&InstallReceipt::new("gmp", "6.2.1", Method::Bottle, vec![]))
            .unwrap();
        assert_eq!(state.query("gmp").unwrap().unwrap().version, "6.2.1");
        assert_eq!(state.list().unwrap().len(), 1);
    }

    #[test]
    fn test_torn_receipt_is_not_installed() {
        let (_dir, state) = state();
        fs::write(state.dir().join("half.json"), "{\"schema_version\": 1, \"na").unwrap();
        assert!(state.query("half").unwrap().is_none());
        assert!(state.list().unwrap().is_empty());
    }

    #[test]
    fn test_leftover_temp_files_ignored() {
        let (_dir, state) = state();
        fs::write(state.dir().join(".tmpAbC123"), "garbage").unwrap();
        assert!(state.list().unwrap().is_empty());
    }

    #[test]
    fn test_dependents() {
        let (_dir, state) = state();
        let mut gcc = InstallReceipt::new("gcc", "11.2.0", Method::Bottle, vec![]);
        gcc.runtime_dependencies.push(RuntimeDependency {
            name: "gmp".into(),
            version: "6.2.1".into(),
        });
        state.record(&gcc).unwrap();
        state
            .record(&InstallReceipt::new("gmp", "6.2.1", Method::Bottle, vec![]))
            .unwrap();
        assert_eq!(state.dependents("gmp").unwrap(), vec!["gcc"]);
        assert!(state.dependents("gcc").unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_commits_same_name() {
        let (_dir, state) = state();
        let state = Arc::new(state);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    let r = InstallReceipt::new("zstd", format!("1.5.{i}"), Method::Source, vec![]);
                    state.record(&r).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let receipt = state.query("zstd").unwrap().unwrap();
        assert!(receipt.version.starts_with("1.5."));
        assert_eq!(state.list().unwrap().len(), 1);
    }
}
