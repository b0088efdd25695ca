//! Install receipts: the persisted record of a completed install.
//!
//! One receipt exists per installed formula. It records:
//! - **What** was installed: name and package version
//! - **How**: poured from a bottle (and which tag) or built from source
//! - **Files**: the keg manifest, relative to the keg root
//! - **Links**: the dependency versions the keg was installed against
//!
//! # Format versions
//!
//! Receipts carry a `schema_version`. Version 0 receipts predate manifests
//! and stored the install method as a `poured_from_bottle` flag; they are
//! migrated on read:
//!
//! ```json
//! {"name": "zstd", "version": "1.5.0", "poured_from_bottle": true, "time": 1633024800}
//! ```

use crate::platform::{Arch, Environment, MacosRelease, Os};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use walkdir::WalkDir;

pub const RECEIPT_SCHEMA_VERSION: u32 = 1;

/// How a formula ended up installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Bottle,
    Source,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Bottle => f.write_str("bottle"),
            Method::Source => f.write_str("source"),
        }
    }
}

/// A dependency version the keg was installed against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltOn {
    pub os: Os,
    pub arch: Arch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macos: Option<MacosRelease>,
}

impl From<&Environment> for BuiltOn {
    fn from(env: &Environment) -> Self {
        Self {
            os: env.os,
            arch: env.arch,
            macos: env.macos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub schema_version: u32,
    pub name: String,
    pub version: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottle_tag: Option<String>,
    #[serde(default)]
    pub manifest: Vec<String>,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
    #[serde(default)]
    pub installed_on_request: bool,
    #[serde(default)]
    pub keg_only: bool,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_on: Option<BuiltOn>,
}

impl InstallReceipt {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        method: Method,
        manifest: Vec<String>,
    ) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            name: name.into(),
            version: version.into(),
            method,
            bottle_tag: None,
            manifest,
            runtime_dependencies: vec![],
            installed_on_request: false,
            keg_only: false,
            time: chrono::Utc::now().timestamp(),
            built_on: None,
        }
    }

    /// Parse receipt JSON, migrating older schema versions
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let mut value: Value = serde_json::from_str(text).context("Receipt is not valid JSON")?;
        migrate(&mut value)?;
        serde_json::from_value(value).context("Failed to parse install receipt")
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize install receipt")
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.runtime_dependencies.iter().any(|d| d.name == name)
    }
}

/// Bring a receipt value up to [`RECEIPT_SCHEMA_VERSION`]
fn migrate(value: &mut Value) -> anyhow::Result<()> {
    let obj = value
        .as_object_mut()
        .context("Receipt must be a JSON object")?;
    let version = obj
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    if version > RECEIPT_SCHEMA_VERSION as u64 {
        anyhow::bail!(
            "Receipt schema {} is newer than supported ({})",
            version,
            RECEIPT_SCHEMA_VERSION
        );
    }

    if version == 0 {
        let poured = obj
            .remove("poured_from_bottle")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        obj.entry("method")
            .or_insert_with(|| Value::from(if poured { "bottle" } else { "source" }));
        obj.entry("manifest")
            .or_insert_with(|| Value::Array(Vec::new()));
        obj.insert("schema_version".into(), Value::from(RECEIPT_SCHEMA_VERSION));
    }

    Ok(())
}

/// Every file and symlink under a keg, relative to the keg root, sorted
pub fn collect_manifest(keg: &Path) -> anyhow::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(keg).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk keg: {}", keg.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(keg)
            .context("Keg entry outside keg")?;
        files.push(rel.to_string_lossy().into_owned());
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_round_trip_current_schema() {
        let mut receipt = InstallReceipt::new("zstd", "1.5.0", Method::Bottle, vec!["bin/zstd".into()]);
        receipt.bottle_tag = Some("arm64_sonoma".into());
        let json = receipt.to_json().unwrap();
        let back = InstallReceipt::from_json(&json).unwrap();
        assert_eq!(back, receipt);
    }

    #[test]
    fn test_migrates_v0() {
        let old = r#"{"name": "zstd", "version": "1.5.0", "poured_from_bottle": true, "time": 1633024800}"#;
        let receipt = InstallReceipt::from_json(old).unwrap();
        assert_eq!(receipt.schema_version, RECEIPT_SCHEMA_VERSION);
        assert_eq!(receipt.method, Method::Bottle);
        assert!(receipt.manifest.is_empty());
    }

    #[test]
    fn test_rejects_future_schema() {
        let future = r#"{"schema_version": 99, "name": "x", "version": "1", "method": "source", "time": 0}"#;
        assert!(InstallReceipt::from_json(future).is_err());
    }

    #[test]
    fn test_collect_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::create_dir_all(dir.path().join("share/man")).unwrap();
        fs::write(dir.path().join("bin/hello"), "#!/bin/sh\n").unwrap();
        fs::write(dir.path().join("share/man/hello.1"), "").unwrap();

        let manifest = collect_manifest(dir.path()).unwrap();
        assert_eq!(manifest, vec!["bin/hello", "share/man/hello.1"]);
    }
}
