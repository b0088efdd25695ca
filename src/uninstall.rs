//! Removing installed formulae.

use crate::cellar::Layout;
use crate::error::{KegError, Result};
use crate::receipt::InstallReceipt;
use crate::state::InstallState;
use crate::symlink;
use std::fs;
use tracing::debug;

/// What an uninstall removed
#[derive(Debug)]
pub struct Removed {
    pub receipt: InstallReceipt,
    pub unlinked: usize,
}

/// Unlink and delete a formula's keg, then drop its receipt.
///
/// # Errors
///
/// - [`KegError::NotInstalled`] if no receipt exists
/// - [`KegError::HasDependents`] if installed formulae depend on it and
///   `force` is not set
pub fn uninstall(layout: &Layout, state: &InstallState, name: &str, force: bool) -> Result<Removed> {
    let receipt = state
        .query(name)?
        .ok_or_else(|| KegError::NotInstalled(name.to_string()))?;

    if !force {
        let dependents = state.dependents(name)?;
        if !dependents.is_empty() {
            return Err(KegError::HasDependents {
                formula: name.to_string(),
                dependents,
            });
        }
    }

    let keg = layout.keg(name, &receipt.version);
    let unlinked = if keg.is_dir() {
        symlink::unlink_keg(layout, &keg)?.len()
    } else {
        0
    };
    symlink::remove_optlink(layout, name, &keg)?;

    // Receipt goes first: a crash after this leaves an unrecorded keg, never
    // a receipt for a missing one
    state.remove(name)?;

    if keg.exists() {
        fs::remove_dir_all(&keg)?;
    }
    let formula_dir = layout.cellar().join(name);
    if formula_dir.is_dir() && formula_dir.read_dir()?.next().is_none() {
        fs::remove_dir(&formula_dir)?;
    }

    debug!("Uninstalled {} {}", name, receipt.version);
    Ok(Removed { receipt, unlinked })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::receipt::{Method, RuntimeDependency};

    fn install_fake(layout: &Layout, state: &InstallState, name: &str, deps: &[&str]) {
        let keg = layout.keg(name, "1.0");
        fs::create_dir_all(keg.join("bin")).unwrap();
        fs::write(keg.join("bin").join(name), "").unwrap();
        symlink::link_keg(layout, &keg).unwrap();
        symlink::optlink(layout, name, &keg).unwrap();

        let mut receipt = InstallReceipt::new(name, "1.0", Method::Source, vec![format!("bin/{name}")]);
        receipt.runtime_dependencies = deps
            .iter()
            .map(|d| RuntimeDependency {
                name: d.to_string(),
                version: "1.0".into(),
            })
            .collect();
        state.record(&receipt).unwrap();
    }

    #[test]
    fn test_uninstall_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let state = InstallState::open(layout.receipts()).unwrap();
        install_fake(&layout, &state, "zstd", &[]);

        let removed = uninstall(&layout, &state, "zstd", false).unwrap();
        assert_eq!(removed.unlinked, 1);
        assert!(state.query("zstd").unwrap().is_none());
        assert!(!layout.cellar().join("zstd").exists());
        assert!(layout.opt("zstd").symlink_metadata().is_err());
        assert!(dir.path().join("bin/zstd").symlink_metadata().is_err());
    }

    #[test]
    fn test_refuses_with_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let state = InstallState::open(layout.receipts()).unwrap();
        install_fake(&layout, &state, "gmp", &[]);
        install_fake(&layout, &state, "gcc", &["gmp"]);

        match uninstall(&layout, &state, "gmp", false) {
            Err(KegError::HasDependents { dependents, .. }) => assert_eq!(dependents, vec!["gcc"]),
            other => panic!("expected HasDependents, got {other:?}"),
        }
        assert!(state.query("gmp").unwrap().is_some());

        uninstall(&layout, &state, "gmp", true).unwrap();
        assert!(state.query("gmp").unwrap().is_none());
    }

    #[test]
    fn test_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let state = InstallState::open(layout.receipts()).unwrap();
        let err = uninstall(&layout, &state, "nope", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInstalled);
    }
}
