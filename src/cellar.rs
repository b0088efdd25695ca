//! Prefix layout: where kegs, links, receipts, downloads and scratch space live.
//!
//! ```text
//! <prefix>/
//!   Cellar/<name>/<pkg_version>/   installed kegs
//!   opt/<name> -> ../Cellar/...    version-agnostic keg links
//!   bin/ lib/ include/ share/ ...  symlinks into kegs
//!   var/kegforge/receipts/         one JSON receipt per formula
//!   var/kegforge/tmp/              build workspaces
//! ```

use std::path::{Path, PathBuf};

/// Detect the install prefix on this system
pub fn detect_prefix() -> PathBuf {
    // First check environment variable
    if let Ok(prefix) = std::env::var("KEG_PREFIX") {
        return PathBuf::from(prefix);
    }

    // Detect by architecture
    #[cfg(target_arch = "aarch64")]
    {
        PathBuf::from("/opt/homebrew")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        PathBuf::from("/usr/local")
    }
}

/// Download cache directory (`$XDG_CACHE_HOME/kegforge` or `~/.cache/kegforge`)
pub fn default_cache_dir() -> PathBuf {
    if let Some(cache) = std::env::var_os("KEG_CACHE") {
        PathBuf::from(cache)
    } else if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("kegforge")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache/kegforge")
    } else {
        PathBuf::from(".cache/kegforge")
    }
}

/// Directory layout rooted at one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub prefix: PathBuf,
    pub cache: PathBuf,
}

impl Layout {
    pub fn new(prefix: impl Into<PathBuf>, cache: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            cache: cache.into(),
        }
    }

    /// Layout with a cache directory inside the prefix
    pub fn rooted(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        let cache = prefix.join("var/kegforge/cache");
        Self { prefix, cache }
    }

    pub fn cellar(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    pub fn keg(&self, name: &str, pkg_version: &str) -> PathBuf {
        self.cellar().join(name).join(pkg_version)
    }

    pub fn opt(&self, name: &str) -> PathBuf {
        self.prefix.join("opt").join(name)
    }

    pub fn receipts(&self) -> PathBuf {
        self.prefix.join("var/kegforge/receipts")
    }

    pub fn tmp(&self) -> PathBuf {
        self.prefix.join("var/kegforge/tmp")
    }

    pub fn downloads(&self) -> PathBuf {
        self.cache.join("downloads")
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }
}
