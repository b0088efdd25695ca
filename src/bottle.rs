//! Bottle selection: pour a precompiled keg or build from source.
//!
//! A bottle is usable when all of these hold:
//! - source builds aren't forced
//! - a file exists for the environment's tag, or for a compatible one
//! - the file can be poured into this Cellar
//! - the bottle's `pour_only_if` toolchain is present
//!
//! Compatible tags, best first:
//!
//! ```text
//! arm64_sequoia  ->  arm64_sequoia, arm64_sonoma, arm64_ventura, ..., all
//! x86_64_linux   ->  x86_64_linux, all
//! ```
//!
//! Selection is cheap and depends on the environment and installed
//! toolchains, so it is recomputed on every run rather than cached.

use crate::cellar::Layout;
use crate::error::Result;
use crate::formula::{BottleCellar, BottleFile, BottleSpec, Formula};
use crate::platform::{BottleTag, Environment, MacosRelease};
use crate::registry::Registry;
use crate::resolver::{Resolution, ResolvedFormula};
use crate::version::Version;
use std::path::Path;
use tracing::debug;

/// A specific bottle file chosen for pouring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleRef {
    pub tag: String,
    pub url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Bottle(BottleRef),
    Source,
}

impl Selection {
    pub fn is_bottle(&self) -> bool {
        matches!(self, Selection::Bottle(_))
    }
}

/// Tags a bottle may carry and still run here, best match first
pub fn compatible_tags(env: &Environment) -> Vec<BottleTag> {
    let mut tags = Vec::new();
    match env.bottle_tag() {
        BottleTag::Macos { arch, release } => {
            tags.push(BottleTag::Macos { arch, release });
            // Bottles built on older releases run on newer ones
            let mut older: Vec<MacosRelease> = ALL_RELEASES
                .iter()
                .copied()
                .filter(|r| *r < release)
                .collect();
            older.sort_by(|a, b| b.cmp(a));
            tags.extend(older.into_iter().map(|release| BottleTag::Macos { arch, release }));
        }
        tag => tags.push(tag),
    }
    tags.push(BottleTag::All);
    tags
}

const ALL_RELEASES: &[MacosRelease] = &[
    MacosRelease::Mojave,
    MacosRelease::Catalina,
    MacosRelease::BigSur,
    MacosRelease::Monterey,
    MacosRelease::Ventura,
    MacosRelease::Sonoma,
    MacosRelease::Sequoia,
    MacosRelease::Tahoe,
];

/// Bottle download URL: explicit, or `{root_url}/{name}--{version}.{tag}.bottle[.{rebuild}].tar.gz`
pub fn bottle_url(
    spec: &BottleSpec,
    file: &BottleFile,
    name: &str,
    version: &Version,
    tag: &str,
) -> Option<String> {
    if let Some(url) = &file.url {
        return Some(url.clone());
    }
    let root = spec.root_url.as_deref()?.trim_end_matches('/');
    let suffix = if spec.rebuild > 0 {
        format!("bottle.{}.tar.gz", spec.rebuild)
    } else {
        "bottle.tar.gz".to_string()
    };
    Some(format!("{}/{}--{}.{}.{}", root, name, version, tag, suffix))
}

/// Per-run bottle policy
#[derive(Debug, Clone)]
pub struct Selector<'a> {
    layout: &'a Layout,
    build_from_source: bool,
}

impl<'a> Selector<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        Self {
            layout,
            build_from_source: false,
        }
    }

    /// Never pour bottles
    pub fn build_from_source(mut self, yes: bool) -> Self {
        self.build_from_source = yes;
        self
    }

    pub fn select(&self, formula: &Formula, env: &Environment) -> Selection {
        if self.build_from_source {
            return Selection::Source;
        }
        let Some(spec) = &formula.bottle else {
            debug!("{}: no bottles declared", formula.name);
            return Selection::Source;
        };
        if let Some(toolchain) = &spec.pour_only_if {
            if !env.has_toolchain(toolchain) {
                debug!("{}: bottle needs toolchain {}", formula.name, toolchain);
                return Selection::Source;
            }
        }

        let version = formula.pkg_version(env);
        for tag in compatible_tags(env) {
            let tag = tag.to_string();
            let Some(file) = spec.files.get(&tag) else {
                continue;
            };
            if !pourable(&file.cellar, &self.layout.cellar()) {
                debug!("{}: {} bottle is for another Cellar", formula.name, tag);
                continue;
            }
            let Some(url) = bottle_url(spec, file, &formula.name, &version, &tag) else {
                debug!("{}: {} bottle has no URL", formula.name, tag);
                continue;
            };
            return Selection::Bottle(BottleRef {
                tag,
                url,
                sha256: file.sha256.clone(),
            });
        }

        debug!(
            "{}: no bottle for {}",
            formula.name,
            env.bottle_tag()
        );
        Selection::Source
    }

    /// Attach a selection to every pending node of a resolution
    pub fn annotate(
        &self,
        resolution: &Resolution,
        registry: &Registry,
        env: &Environment,
    ) -> Result<Plan> {
        let mut entries = Vec::new();
        let mut satisfied = Vec::new();

        for node in &resolution.order {
            if node.satisfied {
                satisfied.push(node.clone());
                continue;
            }
            let formula = registry.lookup(&node.name)?;
            entries.push(PlanEntry {
                selection: self.select(formula, env),
                formula: formula.clone(),
                node: node.clone(),
            });
        }

        Ok(Plan { entries, satisfied })
    }
}

fn pourable(cellar: &BottleCellar, ours: &Path) -> bool {
    match cellar {
        BottleCellar::Any | BottleCellar::AnySkipRelocation => true,
        BottleCellar::Path(p) => Path::new(p) == ours,
    }
}

/// One executable step of the plan
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub node: ResolvedFormula,
    pub formula: Formula,
    pub selection: Selection,
}

impl PlanEntry {
    pub fn name(&self) -> &str {
        &self.node.name
    }
}

/// Resolution plus install method for each pending formula
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    /// Already installed, nothing to do
    pub satisfied: Vec<ResolvedFormula>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(PlanEntry::name).collect()
    }
}
