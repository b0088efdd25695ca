//! Platform detection, bottle tags, and platform predicates.
//!
//! The [`Environment`] describes the machine a run targets: operating system,
//! CPU architecture, macOS release, and the toolchains that are present. It is
//! built once per run (detected, or parsed from a `--platform` override) and
//! never mutated afterwards.
//!
//! # Bottle Tag Format
//!
//! Bottles are keyed by platform tags like `arm64_sequoia` or `x86_64_linux`:
//! - `<arch>_<macos release>` on macOS
//! - `<arch>_linux` on Linux
//! - `all` for architecture-independent bottles
//!
//! # Predicates
//!
//! Dependency edges and build steps carry an optional [`Predicate`] which is
//! evaluated against the environment exactly once. Predicates are declarative:
//!
//! ```json
//! { "not": { "os": "macos" } }
//! { "all": [ { "os": "linux" }, { "arch": "arm64" } ] }
//! { "toolchain": "clt" }
//! ```

#[cfg(target_os = "macos")]
use anyhow::Context;
use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
#[cfg(target_os = "macos")]
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Macos,
    Linux,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Os::Macos => f.write_str("macos"),
            Os::Linux => f.write_str("linux"),
        }
    }
}

/// CPU architecture, spelled the Homebrew way (`arm64`, not `aarch64`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Arm64,
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Arch {
    fn current() -> Result<Self> {
        match std::env::consts::ARCH {
            "aarch64" => Ok(Arch::Arm64),
            "x86_64" => Ok(Arch::X86_64),
            other => bail!("Unsupported architecture: {}", other),
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::X86_64 => "x86_64",
        }
    }
}

/// macOS releases in chronological order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacosRelease {
    Mojave,
    Catalina,
    BigSur,
    Monterey,
    Ventura,
    Sonoma,
    Sequoia,
    Tahoe,
}

const MACOS_RELEASES: &[(MacosRelease, &str)] = &[
    (MacosRelease::Mojave, "mojave"),
    (MacosRelease::Catalina, "catalina"),
    (MacosRelease::BigSur, "big_sur"),
    (MacosRelease::Monterey, "monterey"),
    (MacosRelease::Ventura, "ventura"),
    (MacosRelease::Sonoma, "sonoma"),
    (MacosRelease::Sequoia, "sequoia"),
    (MacosRelease::Tahoe, "tahoe"),
];

impl MacosRelease {
    pub fn name(self) -> &'static str {
        MACOS_RELEASES
            .iter()
            .find(|(r, _)| *r == self)
            .map(|(_, n)| *n)
            .unwrap_or("unknown")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        MACOS_RELEASES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(r, _)| *r)
    }

    /// Map a `sw_vers -productVersion` string to a release
    pub fn from_product_version(version: &str) -> Self {
        let mut parts = version.split('.').filter_map(|s| s.parse::<u32>().ok());
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);

        match (major, minor) {
            (26, _) | (16, _) => MacosRelease::Tahoe,
            (15, _) => MacosRelease::Sequoia,
            (14, _) => MacosRelease::Sonoma,
            (13, _) => MacosRelease::Ventura,
            (12, _) => MacosRelease::Monterey,
            (11, _) => MacosRelease::BigSur,
            (10, 15) => MacosRelease::Catalina,
            (10, 14) => MacosRelease::Mojave,
            _ => MacosRelease::Sonoma,
        }
    }
}

/// A bottle platform tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BottleTag {
    Macos { arch: Arch, release: MacosRelease },
    Linux { arch: Arch },
    All,
}

impl fmt::Display for BottleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Intel macOS bottles are tagged by release alone
            BottleTag::Macos {
                arch: Arch::X86_64,
                release,
            } => f.write_str(release.name()),
            BottleTag::Macos { arch, release } => write!(f, "{}_{}", arch.tag(), release.name()),
            BottleTag::Linux { arch } => write!(f, "{}_linux", arch.tag()),
            BottleTag::All => f.write_str("all"),
        }
    }
}

impl FromStr for BottleTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "all" {
            return Ok(BottleTag::All);
        }
        if let Some(rest) = s.strip_prefix("arm64_") {
            return match rest {
                "linux" => Ok(BottleTag::Linux { arch: Arch::Arm64 }),
                name => MacosRelease::from_name(name)
                    .map(|release| BottleTag::Macos {
                        arch: Arch::Arm64,
                        release,
                    })
                    .ok_or_else(|| anyhow!("Unknown macOS release in bottle tag: {}", s)),
            };
        }
        if let Some(rest) = s.strip_prefix("x86_64_") {
            return match rest {
                "linux" => Ok(BottleTag::Linux { arch: Arch::X86_64 }),
                name => MacosRelease::from_name(name)
                    .map(|release| BottleTag::Macos {
                        arch: Arch::X86_64,
                        release,
                    })
                    .ok_or_else(|| anyhow!("Unknown macOS release in bottle tag: {}", s)),
            };
        }
        MacosRelease::from_name(s)
            .map(|release| BottleTag::Macos {
                arch: Arch::X86_64,
                release,
            })
            .ok_or_else(|| anyhow!("Unrecognised bottle tag: {}", s))
    }
}

/// Immutable description of the target platform for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub os: Os,
    pub arch: Arch,
    #[serde(default)]
    pub macos: Option<MacosRelease>,
    /// Toolchain name -> version (e.g. `clt` -> `15.3`)
    #[serde(default)]
    pub toolchains: BTreeMap<String, String>,
}

impl Environment {
    /// Detect the current system.
    ///
    /// # Errors
    ///
    /// Returns an error on unsupported operating systems or architectures, or
    /// if `sw_vers` cannot be run on macOS.
    pub fn detect() -> Result<Self> {
        let arch = Arch::current()?;

        #[cfg(target_os = "macos")]
        {
            let release = MacosRelease::from_product_version(&macos_version()?);
            Ok(Self {
                os: Os::Macos,
                arch,
                macos: Some(release),
                toolchains: detect_toolchains(),
            })
        }

        #[cfg(target_os = "linux")]
        {
            Ok(Self {
                os: Os::Linux,
                arch,
                macos: None,
                toolchains: detect_toolchains(),
            })
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = arch;
            bail!("Unsupported platform")
        }
    }

    /// Build an environment from a bottle tag (`--platform arm64_sonoma`)
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.parse::<BottleTag>()? {
            BottleTag::Macos { arch, release } => Ok(Self {
                os: Os::Macos,
                arch,
                macos: Some(release),
                toolchains: BTreeMap::new(),
            }),
            BottleTag::Linux { arch } => Ok(Self {
                os: Os::Linux,
                arch,
                macos: None,
                toolchains: BTreeMap::new(),
            }),
            BottleTag::All => bail!("'all' is not a concrete platform"),
        }
    }

    pub fn with_toolchain(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.toolchains.insert(name.into(), version.into());
        self
    }

    pub fn has_toolchain(&self, name: &str) -> bool {
        self.toolchains.contains_key(name)
    }

    /// The preferred bottle tag for this environment
    pub fn bottle_tag(&self) -> BottleTag {
        match (self.os, self.macos) {
            (Os::Macos, Some(release)) => BottleTag::Macos {
                arch: self.arch,
                release,
            },
            (Os::Macos, None) => BottleTag::Macos {
                arch: self.arch,
                release: MacosRelease::Sonoma,
            },
            (Os::Linux, _) => BottleTag::Linux { arch: self.arch },
        }
    }
}

/// Declarative platform condition attached to edges and steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Os(Os),
    Arch(Arch),
    MacosAtLeast(MacosRelease),
    Toolchain(String),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn eval(&self, env: &Environment) -> bool {
        match self {
            Predicate::Os(os) => env.os == *os,
            Predicate::Arch(arch) => env.arch == *arch,
            Predicate::MacosAtLeast(min) => env.macos.is_some_and(|r| r >= *min),
            Predicate::Toolchain(name) => env.has_toolchain(name),
            Predicate::Not(inner) => !inner.eval(env),
            Predicate::All(ps) => ps.iter().all(|p| p.eval(env)),
            Predicate::Any(ps) => ps.iter().any(|p| p.eval(env)),
        }
    }
}

/// Evaluate an optional predicate; absent means unconditional
pub fn applies(when: Option<&Predicate>, env: &Environment) -> bool {
    when.is_none_or(|p| p.eval(env))
}

#[cfg(target_os = "macos")]
fn macos_version() -> Result<String> {
    let output = Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .context("Failed to run sw_vers")?;

    let version = String::from_utf8(output.stdout)
        .context("Invalid UTF-8 in sw_vers output")?
        .trim()
        .to_string();

    Ok(version)
}

/// Probe for toolchains that bottle policies and predicates refer to
fn detect_toolchains() -> BTreeMap<String, String> {
    let mut found = BTreeMap::new();

    #[cfg(target_os = "macos")]
    {
        if std::path::Path::new("/Library/Developer/CommandLineTools/usr/bin/clang").exists() {
            found.insert("clt".to_string(), "installed".to_string());
        }
    }

    for (name, program) in [("cc", "cc"), ("make", "make"), ("git", "git")] {
        let ok = std::process::Command::new(program)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if ok {
            found.insert(name.to_string(), "installed".to_string());
        }
    }

    found
}
