//! Scoped scratch directories for builds, post-install hooks and tests.
//!
//! A workspace is a [`tempfile::TempDir`] under the prefix's tmp directory and
//! is removed when dropped, whether the build succeeded, failed or panicked.
//!
//! ```text
//! <tmp>/gcc-XXXXXX/
//!   src/        unpacked source (the build path)
//!   resources/  one directory per unpacked resource
//!   home/       $HOME for build processes
//!   tmp/        $TMPDIR for build processes
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug)]
pub struct BuildWorkspace {
    dir: TempDir,
}

impl BuildWorkspace {
    pub fn create(parent: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", name))
            .tempdir_in(parent)
            .with_context(|| format!("Failed to create build workspace for {}", name))?;

        let ws = Self { dir };
        for sub in [ws.src(), ws.resources(), ws.home(), ws.tmp()] {
            fs::create_dir_all(&sub)?;
        }
        Ok(ws)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn src(&self) -> PathBuf {
        self.path().join("src")
    }

    pub fn resources(&self) -> PathBuf {
        self.path().join("resources")
    }

    pub fn home(&self) -> PathBuf {
        self.path().join("home")
    }

    pub fn tmp(&self) -> PathBuf {
        self.path().join("tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let ws = BuildWorkspace::create(parent.path(), "zstd").unwrap();
            assert!(ws.home().is_dir());
            assert!(ws.path().file_name().unwrap().to_string_lossy().starts_with("zstd-"));
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_removed_on_panic() {
        let parent = tempfile::tempdir().unwrap();
        let parent_path = parent.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let _ws = BuildWorkspace::create(&parent_path, "boom").unwrap();
            panic!("build blew up");
        });
        assert!(result.is_err());
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }
}
