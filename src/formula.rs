//! Formula definitions: the parsed form of a recipe.
//!
//! A formula is pure data. Everything imperative about it (build steps,
//! post-install fix-ups, tests) is an ordered list of [`Step`]s, each
//! optionally gated by a platform [`Predicate`]. Nothing here touches the
//! filesystem; evaluation happens in the resolver, selector, and builder.

use crate::platform::{Environment, Predicate, applies};
use crate::version::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// When a dependency is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Needed only while building from source
    Build,
    /// Linked against and needed at runtime
    #[default]
    Runtime,
    /// Needed only to run the formula's test block
    Test,
}

/// A declared dependency edge from the owning formula to `name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub kind: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionReq>,
    /// Provided by the system; never resolved against the registry
    #[serde(default)]
    pub external: bool,
}

impl Dependency {
    pub fn runtime(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DependencyKind::Runtime,
            when: None,
            version: None,
            external: false,
        }
    }

    pub fn build(name: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Build,
            ..Self::runtime(name)
        }
    }

    pub fn test(name: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Test,
            ..Self::runtime(name)
        }
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.when = Some(predicate);
        self
    }

    pub fn requiring(mut self, req: VersionReq) -> Self {
        self.version = Some(req);
        self
    }

    pub fn applies_to(&self, env: &Environment) -> bool {
        applies(self.when.as_ref(), env)
    }
}

/// A downloadable archive with its expected checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<String>,
    pub sha256: String,
}

impl SourceSpec {
    /// Primary URL followed by mirrors, in the order they should be tried
    pub fn urls(&self) -> Vec<String> {
        std::iter::once(self.url.clone())
            .chain(self.mirrors.iter().cloned())
            .collect()
    }
}

/// A source that replaces the primary one on matching platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSource {
    pub when: Predicate,
    #[serde(flatten)]
    pub source: SourceSpec,
    /// Some platform branches ship a differently numbered tarball
    #[serde(default)]
    pub version: Option<Version>,
}

/// A named auxiliary archive needed only at build time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(flatten)]
    pub source: SourceSpec,
}

/// Where a bottle expects to be poured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleCellar {
    /// Relocatable into any Cellar
    Any,
    /// Relocatable and contains no prefix references at all
    AnySkipRelocation,
    /// Hard-wired to one Cellar path
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleFile {
    pub sha256: String,
    #[serde(default = "default_bottle_cellar")]
    pub cellar: BottleCellar,
    /// Explicit URL; otherwise derived from the bottle's `root_url`
    #[serde(default)]
    pub url: Option<String>,
}

fn default_bottle_cellar() -> BottleCellar {
    BottleCellar::Any
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BottleSpec {
    #[serde(default)]
    pub rebuild: u32,
    #[serde(default)]
    pub root_url: Option<String>,
    /// Only pour when this toolchain is present (e.g. `clt`)
    #[serde(default)]
    pub pour_only_if: Option<String>,
    /// Bottle tag -> file
    #[serde(default)]
    pub files: BTreeMap<String, BottleFile>,
}

/// One build, post-install, or test action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Run a program; `args[0]` is the program
    Run {
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    SetEnv { key: String, value: String },
    UnsetEnv { key: String },
    Mkdir { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Predicate>,
}

impl Step {
    pub fn run<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: Action::Run {
                args: args.into_iter().map(Into::into).collect(),
                cwd: None,
            },
            when: None,
        }
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.when = Some(predicate);
        self
    }

    /// Short human-readable description used in errors and logs
    pub fn describe(&self) -> String {
        match &self.action {
            Action::Run { args, .. } => args.join(" "),
            Action::SetEnv { key, value } => format!("set {}={}", key, value),
            Action::UnsetEnv { key } => format!("unset {}", key),
            Action::Mkdir { path } => format!("mkdir {}", path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(flatten)]
    pub source: SourceSpec,
    #[serde(default)]
    pub platform_sources: Vec<PlatformSource>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub bottle: Option<BottleSpec>,
    #[serde(default)]
    pub keg_only: bool,
    #[serde(default)]
    pub install: Vec<Step>,
    #[serde(default)]
    pub post_install: Vec<Step>,
    #[serde(default)]
    pub test: Vec<Step>,
}

impl Formula {
    /// A formula with a single source archive and nothing else
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        url: impl Into<String>,
        sha256: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: Version::new(version),
            revision: 0,
            desc: None,
            homepage: None,
            license: None,
            source: SourceSpec {
                url: url.into(),
                mirrors: vec![],
                sha256: sha256.into(),
            },
            platform_sources: vec![],
            dependencies: vec![],
            resources: vec![],
            bottle: None,
            keg_only: false,
            install: vec![],
            post_install: vec![],
            test: vec![],
        }
    }

    pub fn depends_on(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// The source archive for this platform (first matching branch wins)
    pub fn source_for(&self, env: &Environment) -> &SourceSpec {
        self.platform_sources
            .iter()
            .find(|ps| ps.when.eval(env))
            .map(|ps| &ps.source)
            .unwrap_or(&self.source)
    }

    /// Upstream version on this platform, before the revision suffix
    pub fn version_for(&self, env: &Environment) -> &Version {
        self.platform_sources
            .iter()
            .find(|ps| ps.when.eval(env))
            .and_then(|ps| ps.version.as_ref())
            .unwrap_or(&self.version)
    }

    /// Installed version string: version plus `_revision` when non-zero
    pub fn pkg_version(&self, env: &Environment) -> Version {
        self.version_for(env).with_revision(self.revision)
    }

    /// Dependency edges that exist on this platform
    pub fn dependencies_for<'a>(
        &'a self,
        env: &'a Environment,
    ) -> impl Iterator<Item = &'a Dependency> + 'a {
        self.dependencies.iter().filter(move |d| d.applies_to(env))
    }

    /// Build steps that apply on this platform, in declaration order
    pub fn install_steps<'a>(&'a self, env: &'a Environment) -> impl Iterator<Item = &'a Step> + 'a {
        self.install
            .iter()
            .filter(move |s| applies(s.when.as_ref(), env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};

    fn gcc_like() -> Formula {
        serde_json::from_str(
            r#"{
                "name": "gcc",
                "version": "11.2.0",
                "url": "https://ftp.gnu.org/gnu/gcc/gcc-11.2.0/gcc-11.2.0.tar.xz",
                "mirrors": ["https://ftpmirror.gnu.org/gcc/gcc-11.2.0/gcc-11.2.0.tar.xz"],
                "sha256": "d08edc536b54c372a1010ff6619dd274c0f1603aa49212ba20f7aa2cda36fa8b",
                "platform_sources": [{
                    "when": {"arch": "arm64"},
                    "url": "https://github.com/fxcoudert/gcc/archive/refs/tags/gcc-11.1.0-arm-20210504.tar.gz",
                    "sha256": "ce862b4a4bdc8f36c9240736d23cd625a48af82c2332d2915df0e16e1609a74c"
                }],
                "dependencies": [
                    {"name": "gmp"},
                    {"name": "binutils", "when": {"os": "linux"}},
                    {"name": "zlib", "when": {"not": {"os": "macos"}}}
                ],
                "install": [
                    {"run": {"args": ["../configure", "--prefix={prefix}"], "cwd": "build"}},
                    {"run": {"args": ["make", "install-strip"]}, "when": {"os": "linux"}},
                    {"run": {"args": ["make", "install"]}, "when": {"os": "macos"}}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_platform_source_selection() {
        let f = gcc_like();
        let arm = Environment::from_tag("arm64_big_sur").unwrap();
        let intel = Environment::from_tag("x86_64_linux").unwrap();

        assert!(f.source_for(&arm).url.contains("fxcoudert"));
        assert!(f.source_for(&intel).url.contains("ftp.gnu.org"));
        assert_eq!(f.source_for(&intel).urls().len(), 2);
        // no version override on the arm branch
        assert_eq!(f.version_for(&arm).as_str(), "11.2.0");
    }

    #[test]
    fn test_platform_version_override() {
        let f: Formula = serde_json::from_str(
            r#"{
                "name": "tool", "version": "2.0", "revision": 3,
                "url": "https://example.com/tool-2.0.tar.gz", "sha256": "00",
                "platform_sources": [{
                    "when": {"os": "macos"},
                    "url": "https://example.com/tool-1.9-mac.tar.gz",
                    "sha256": "11",
                    "version": "1.9"
                }]
            }"#,
        )
        .unwrap();
        let mac = Environment::from_tag("arm64_sonoma").unwrap();
        let linux = Environment::from_tag("x86_64_linux").unwrap();

        assert_eq!(f.version_for(&mac).as_str(), "1.9");
        assert_eq!(f.pkg_version(&mac).to_string(), "1.9_3");
        assert_eq!(f.pkg_version(&linux).to_string(), "2.0_3");
    }

    #[test]
    fn test_dependency_filtering() {
        let f = gcc_like();
        let linux = Environment::from_tag("x86_64_linux").unwrap();
        let mac = Environment::from_tag("arm64_sonoma").unwrap();

        let on_linux: Vec<_> = f.dependencies_for(&linux).map(|d| d.name.as_str()).collect();
        let on_mac: Vec<_> = f.dependencies_for(&mac).map(|d| d.name.as_str()).collect();
        assert_eq!(on_linux, vec!["gmp", "binutils", "zlib"]);
        assert_eq!(on_mac, vec!["gmp"]);
    }

    #[test]
    fn test_install_steps_gated() {
        let f = gcc_like();
        let mac = Environment {
            os: Os::Macos,
            arch: Arch::X86_64,
            macos: None,
            toolchains: Default::default(),
        };
        let steps: Vec<_> = f.install_steps(&mac).map(Step::describe).collect();
        assert_eq!(steps, vec!["../configure --prefix={prefix}", "make install"]);
    }

    #[test]
    fn test_pkg_version_with_revision() {
        let mut f = gcc_like();
        let env = Environment::from_tag("x86_64_linux").unwrap();
        assert_eq!(f.pkg_version(&env).as_str(), "11.2.0");
        f.revision = 1;
        assert_eq!(f.pkg_version(&env).as_str(), "11.2.0_1");
    }
}
