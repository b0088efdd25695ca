//! Runtime configuration assembled from environment variables and CLI flags.
//!
//! | Variable          | Meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `KEG_PREFIX`      | install prefix                            |
//! | `KEG_FORMULA_DIR` | directory of `*.json` formula definitions |
//! | `KEG_CACHE`       | download cache                            |
//! | `KEG_JOBS`        | maximum formulae built concurrently       |

use crate::cellar::{self, Layout};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub layout: Layout,
    pub formula_dir: PathBuf,
    pub jobs: usize,
    /// Never pour bottles
    pub build_from_source: bool,
    /// Never build from source
    pub force_bottle: bool,
    /// Reinstall requested formulae even when already installed
    pub force_reinstall: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let prefix = cellar::detect_prefix();
        let formula_dir = std::env::var_os("KEG_FORMULA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| prefix.join("Library/Formula"));
        let jobs = std::env::var("KEG_JOBS")
            .ok()
            .and_then(|j| j.parse::<usize>().ok())
            .filter(|j| *j > 0)
            .unwrap_or_else(default_jobs);

        Self {
            layout: Layout::new(prefix, cellar::default_cache_dir()),
            formula_dir,
            jobs,
            build_from_source: false,
            force_bottle: false,
            force_reinstall: false,
        }
    }

    /// Configuration for an isolated prefix; used by tests and tooling
    pub fn for_prefix(prefix: impl Into<PathBuf>) -> Self {
        let layout = Layout::rooted(prefix);
        Self {
            formula_dir: layout.prefix.join("Library/Formula"),
            layout,
            jobs: default_jobs(),
            build_from_source: false,
            force_bottle: false,
            force_reinstall: false,
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_prefix() {
        let config = Config::for_prefix("/tmp/kegtest");
        assert_eq!(config.formula_dir, PathBuf::from("/tmp/kegtest/Library/Formula"));
        assert!(config.jobs >= 1);
        assert!(!config.force_bottle && !config.build_from_source);
    }
}
