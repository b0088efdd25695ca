//! Formula loader: reads JSON formula definitions from a formula directory.
//!
//! Each formula lives in `<dir>/<name>.json`. The file stem must match the
//! formula's `name`. On top of the plain [`Formula`] shape the loader accepts
//! a `uses_from_macos` list, shorthand for runtime dependencies that macOS
//! already provides:
//!
//! ```json
//! { "name": "gcc", "uses_from_macos": ["zlib"], ... }
//! ```
//!
//! is the same as a `zlib` dependency with `"when": {"not": {"os": "macos"}}`.

use crate::error::{KegError, Result};
use crate::formula::{Dependency, Formula};
use crate::platform::{Os, Predicate};
use crate::registry::Registry;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize)]
struct FormulaFile {
    #[serde(flatten)]
    formula: Formula,
    #[serde(default)]
    uses_from_macos: Vec<String>,
}

/// Parse one formula definition. `name_hint` names the formula in errors.
pub fn parse_formula(name_hint: &str, text: &str) -> Result<Formula> {
    let file: FormulaFile = serde_json::from_str(text).map_err(|e| KegError::Parse {
        formula: name_hint.to_string(),
        message: e.to_string(),
    })?;

    let mut formula = file.formula;
    if formula.name.trim().is_empty() {
        return Err(KegError::Parse {
            formula: name_hint.to_string(),
            message: "empty formula name".to_string(),
        });
    }

    for name in file.uses_from_macos {
        formula
            .dependencies
            .push(Dependency::runtime(name).when(Predicate::Not(Box::new(Predicate::Os(Os::Macos)))));
    }

    // gated self-edges are left to the resolver's cycle check
    for dep in &formula.dependencies {
        if dep.name == formula.name && dep.when.is_none() {
            return Err(KegError::Parse {
                formula: formula.name.clone(),
                message: "formula depends on itself".to_string(),
            });
        }
    }

    Ok(formula)
}

/// Load every `*.json` formula under `dir` into a registry
pub fn load_dir(dir: &Path) -> Result<Registry> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut formulae = Vec::with_capacity(paths.len());
    for path in paths {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let text = fs::read_to_string(&path)?;
        let formula = parse_formula(&stem, &text)?;

        if formula.name != stem {
            return Err(KegError::Parse {
                formula: stem,
                message: format!("file defines formula '{}'", formula.name),
            });
        }

        debug!("Loaded formula {} {}", formula.name, formula.version);
        formulae.push(formula);
    }

    Registry::new(formulae)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::platform::Environment;

    const MINIMAL: &str = r#"{
        "name": "hello",
        "version": "2.12",
        "url": "https://ftp.gnu.org/gnu/hello/hello-2.12.tar.gz",
        "sha256": "cf04af86dc085268c5f4470fbae49b18afbc221b78096aab842d934a76bad0ab"
    }"#;

    #[test]
    fn test_parse_minimal() {
        let f = parse_formula("hello", MINIMAL).unwrap();
        assert_eq!(f.name, "hello");
        assert_eq!(f.version.as_str(), "2.12");
        assert!(f.dependencies.is_empty());
        assert!(f.bottle.is_none());
    }

    #[test]
    fn test_malformed_names_formula() {
        let err = parse_formula("broken", "{ \"name\": \"broken\", ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_missing_checksum_is_parse_error() {
        let err = parse_formula(
            "nosum",
            r#"{"name": "nosum", "version": "1.0", "url": "https://example.com/a.tar.gz"}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_uses_from_macos_expands() {
        let text = r#"{
            "name": "gcc", "version": "11.2.0",
            "url": "https://example.com/gcc.tar.xz", "sha256": "00",
            "uses_from_macos": ["zlib"]
        }"#;
        let f = parse_formula("gcc", text).unwrap();
        let linux = Environment::from_tag("x86_64_linux").unwrap();
        let mac = Environment::from_tag("arm64_sonoma").unwrap();
        assert_eq!(f.dependencies_for(&linux).count(), 1);
        assert_eq!(f.dependencies_for(&mac).count(), 0);
    }

    #[test]
    fn test_self_dependency() {
        let plain = r#"{
            "name": "a", "version": "1.0",
            "url": "https://example.com/a.tar.gz", "sha256": "00",
            "dependencies": [{"name": "a"}]
        }"#;
        let err = parse_formula("a", plain).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);

        let gated = r#"{
            "name": "a", "version": "1.0",
            "url": "https://example.com/a.tar.gz", "sha256": "00",
            "dependencies": [{"name": "a", "when": {"os": "macos"}}]
        }"#;
        let f = parse_formula("a", gated).unwrap();
        let linux = Environment::from_tag("x86_64_linux").unwrap();
        assert_eq!(f.dependencies_for(&linux).count(), 0);
    }

    #[test]
    fn test_load_dir_rejects_name_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hi.json"), MINIMAL).unwrap();
        let err = load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, KegError::Parse { ref formula, .. } if formula == "hi"));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.json"), MINIMAL).unwrap();
        fs::write(dir.path().join("README.md"), "not a formula").unwrap();
        let registry = load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("hello").is_ok());
    }
}
