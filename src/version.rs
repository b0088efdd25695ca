//! Formula versions and version requirements.
//!
//! Homebrew-style versions are not semver: `2021.10`, `1.4.0_32`, `3.9.7`,
//! `11.2.0` all occur. Ordering compares dot-separated numeric components
//! numerically and falls back to lexicographic comparison for anything that
//! isn't a number. A trailing `_N` is a formula revision, not part of the
//! upstream version.
//!
//! Requirements are comma-separated comparator lists, all of which must hold:
//!
//! ```
//! use kegforge::version::{Version, VersionReq};
//!
//! let req: VersionReq = ">= 3.9, < 4".parse().unwrap();
//! assert!(req.matches(&Version::new("3.9.7")));
//! assert!(!req.matches(&Version::new("4.0")));
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A formula version string with numeric-aware ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Version without the `_N` revision suffix
    pub fn upstream(&self) -> &str {
        strip_revision(&self.0)
    }

    /// Append a revision suffix when the revision is non-zero (`1.0` + 1 = `1.0_1`)
    pub fn with_revision(&self, revision: u32) -> Version {
        if revision == 0 {
            self.clone()
        } else {
            Version(format!("{}_{}", self.0, revision))
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version::new(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.0, &other.0)
    }
}

/// Strip a trailing `_N` revision. Underscores followed by non-digits are kept.
pub fn strip_revision(version: &str) -> &str {
    if let Some(pos) = version.rfind('_') {
        let tail = &version[pos + 1..];
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            return &version[..pos];
        }
    }
    version
}

fn revision_of(version: &str) -> u32 {
    match version.rfind('_') {
        Some(pos) if strip_revision(version).len() == pos => {
            version[pos + 1..].parse().unwrap_or(0)
        }
        _ => 0,
    }
}

/// Compare two version strings, numeric components first
fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_up, b_up) = (strip_revision(a), strip_revision(b));
    let a_parts: Vec<&str> = a_up.split(['.', '-']).collect();
    let b_parts: Vec<&str> = b_up.split(['.', '-']).collect();

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).copied().unwrap_or("0");
        let b_part = b_parts.get(i).copied().unwrap_or("0");
        let ord = match (a_part.parse::<u64>(), b_part.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a_part.cmp(b_part),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    revision_of(a).cmp(&revision_of(b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn matches(&self, v: &Version) -> bool {
        // Revisions repackage the same upstream release
        let ord = compare_versions(v.upstream(), self.version.upstream());
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
        }
    }
}

/// A conjunction of comparators such as `>= 1.2, < 2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionReq {
    comparators: Vec<Comparator>,
    raw: String,
}

impl VersionReq {
    /// Requirement pinning exactly `v`
    pub fn exact(v: &Version) -> Self {
        Self {
            comparators: vec![Comparator {
                op: Op::Eq,
                version: v.clone(),
            }],
            raw: format!("= {}", v),
        }
    }

    pub fn matches(&self, v: &Version) -> bool {
        self.comparators.iter().all(|c| c.matches(v))
    }

    /// True when some candidate satisfies both requirements
    pub fn compatible_with(&self, other: &VersionReq, candidates: &[&Version]) -> bool {
        candidates
            .iter()
            .any(|v| self.matches(v) && other.matches(v))
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VersionReq {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut comparators = Vec::new();
        for part in s.split(',').map(str::trim) {
            if part.is_empty() {
                return Err(format!("empty comparator in '{}'", s));
            }
            let (op, rest) = if let Some(r) = part.strip_prefix(">=") {
                (Op::Ge, r)
            } else if let Some(r) = part.strip_prefix("<=") {
                (Op::Le, r)
            } else if let Some(r) = part.strip_prefix('>') {
                (Op::Gt, r)
            } else if let Some(r) = part.strip_prefix('<') {
                (Op::Lt, r)
            } else if let Some(r) = part.strip_prefix('=') {
                (Op::Eq, r)
            } else {
                (Op::Eq, part)
            };
            let rest = rest.trim();
            if rest.is_empty() || rest.contains(char::is_whitespace) {
                return Err(format!("invalid version in '{}'", part));
            }
            comparators.push(Comparator {
                op,
                version: Version::new(rest),
            });
        }
        Ok(Self {
            comparators,
            raw: s.trim().to_string(),
        })
    }
}

impl Serialize for VersionReq {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for VersionReq {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_revision() {
        assert_eq!(strip_revision("1.4.0_32"), "1.4.0");
        assert_eq!(strip_revision("2.14.1"), "2.14.1");
        assert_eq!(strip_revision("1.0_beta"), "1.0_beta");
        assert_eq!(strip_revision("python@3.11_5"), "python@3.11");
        assert_eq!(strip_revision("1.0_"), "1.0_");
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(Version::new("1.10") > Version::new("1.9"));
        assert!(Version::new("11.2.0") > Version::new("9.4.0"));
        assert!(Version::new("2021.10") < Version::new("2022.1"));
        assert_eq!(Version::new("1.0"), Version::new("1.0.0"));
    }

    #[test]
    fn test_revision_orders_after_upstream() {
        assert!(Version::new("1.0_1") > Version::new("1.0"));
        assert!(Version::new("1.0_2") > Version::new("1.0_1"));
        assert!(Version::new("1.1") > Version::new("1.0_9"));
        assert_eq!(Version::new("3.0").with_revision(2).as_str(), "3.0_2");
        assert_eq!(Version::new("3.0").with_revision(0).as_str(), "3.0");
    }

    #[test]
    fn test_requirement_parsing() {
        let req: VersionReq = ">= 3.9, < 4".parse().unwrap();
        assert!(req.matches(&Version::new("3.9")));
        assert!(req.matches(&Version::new("3.10.1")));
        assert!(!req.matches(&Version::new("4.0")));

        let exact: VersionReq = "2.11.1".parse().unwrap();
        assert!(exact.matches(&Version::new("2.11.1")));
        assert!(exact.matches(&Version::new("2.11.1_2")));
        assert!(!exact.matches(&Version::new("2.11.2")));

        assert!(">= ".parse::<VersionReq>().is_err());
        assert!("1.0,".parse::<VersionReq>().is_err());
    }

    #[test]
    fn test_compatibility_against_candidates() {
        let a: VersionReq = ">= 2".parse().unwrap();
        let b: VersionReq = "< 2".parse().unwrap();
        let v1 = Version::new("1.5");
        let v2 = Version::new("2.1");
        assert!(!a.compatible_with(&b, &[&v1, &v2]));

        let c: VersionReq = "<= 2.1".parse().unwrap();
        assert!(a.compatible_with(&c, &[&v1, &v2]));
    }
}
