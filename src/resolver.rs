//! Dependency resolution.
//!
//! The resolver expands requested formulae into the full set of formulae that
//! must be present, then orders them so that every dependency comes before
//! its dependents.
//!
//! # Algorithm
//!
//! Depth-first traversal over runtime and build edges. Edges whose platform
//! predicate doesn't hold in the [`Environment`] are not part of the graph at
//! all. A node is emitted after all of its dependencies (post-order); roots
//! and children are visited in lexical order, so the same inputs always give
//! the same plan:
//!
//! ```text
//! requested: [y, x]       y -> x      x -> (none)
//! order:     [x, y]
//! ```
//!
//! A node met again while still on the DFS stack closes a cycle; the cycle is
//! reported in traversal order with the first name repeated at the end.
//!
//! Installed formulae at a satisfying version stay in the graph (their
//! requirements still participate in conflict detection) but are marked
//! satisfied and left out of the executable plan.

use crate::error::{KegError, Requirement, Result};
use crate::formula::{DependencyKind, Formula};
use crate::platform::Environment;
use crate::receipt::InstallReceipt;
use crate::registry::Registry;
use crate::state::InstallState;
use crate::version::{Version, VersionReq};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Reinstall requested formulae even when already installed
    pub force_reinstall: bool,
    /// Follow test-time edges of the requested formulae
    pub include_test_deps: bool,
}

/// One node of the resolved graph
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFormula {
    pub name: String,
    /// Package version that will be (or already is) installed
    pub version: Version,
    /// Direct dependencies after platform filtering, sorted
    pub dependencies: Vec<String>,
    /// The subset of `dependencies` needed at runtime
    pub runtime_dependencies: Vec<String>,
    pub requested: bool,
    /// Already installed at a satisfying version
    pub satisfied: bool,
    /// Currently installed version, if any
    pub installed: Option<String>,
}

/// Resolver output: every node in dependency order
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub order: Vec<ResolvedFormula>,
}

impl Resolution {
    /// Nodes that need installing, in order
    pub fn pending(&self) -> impl Iterator<Item = &ResolvedFormula> {
        self.order.iter().filter(|n| !n.satisfied)
    }

    pub fn satisfied(&self) -> impl Iterator<Item = &ResolvedFormula> {
        self.order.iter().filter(|n| n.satisfied)
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedFormula> {
        self.order.iter().find(|n| n.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|n| n.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Edge {
    name: String,
    runtime: bool,
    requirements: Vec<VersionReq>,
}

#[derive(Default)]
struct Walk {
    marks: HashMap<String, Mark>,
    stack: Vec<String>,
    order: Vec<(String, Vec<Edge>)>,
    constraints: BTreeMap<String, Vec<(String, VersionReq)>>,
}

pub struct Resolver<'a> {
    registry: &'a Registry,
    env: &'a Environment,
    installed: BTreeMap<String, InstallReceipt>,
    options: ResolveOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry, env: &'a Environment) -> Self {
        Self {
            registry,
            env,
            installed: BTreeMap::new(),
            options: ResolveOptions::default(),
        }
    }

    /// Take installed receipts from the state tracker
    pub fn with_state(self, state: &InstallState) -> Result<Self> {
        Ok(self.with_installed(state.snapshot()?))
    }

    pub fn with_installed(mut self, installed: BTreeMap<String, InstallReceipt>) -> Self {
        self.installed = installed;
        self
    }

    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve `requests` into a dependency-ordered graph.
    ///
    /// # Errors
    ///
    /// - [`KegError::FormulaNotFound`] if a requested or required formula is unknown
    /// - [`KegError::DependencyCycle`] if the filtered graph has a cycle
    /// - [`KegError::VersionConflict`] if version requirements can't all be met
    pub fn resolve(&self, requests: &[String]) -> Result<Resolution> {
        let requested: BTreeSet<String> = requests.iter().cloned().collect();
        let mut walk = Walk::default();

        for name in &requested {
            self.visit(name, None, &requested, &mut walk)?;
        }

        let mut order = Vec::with_capacity(walk.order.len());
        for (name, edges) in walk.order {
            let formula = self.registry.lookup(&name)?;
            let is_requested = requested.contains(&name);
            let constraints = walk
                .constraints
                .get(&name)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let installed = self.installed.get(&name).map(|r| r.version.clone());
            let forced = self.options.force_reinstall && is_requested;

            let version = self.choose_version(formula, constraints, installed.as_deref(), forced)?;
            let satisfied =
                !forced && installed.as_deref().is_some_and(|iv| Version::new(iv) == version);

            debug!(
                "Resolved {} {}{}",
                name,
                version,
                if satisfied { " (satisfied)" } else { "" }
            );

            order.push(ResolvedFormula {
                dependencies: edges.iter().map(|e| e.name.clone()).collect(),
                runtime_dependencies: edges
                    .iter()
                    .filter(|e| e.runtime)
                    .map(|e| e.name.clone())
                    .collect(),
                name,
                version,
                requested: is_requested,
                satisfied,
                installed,
            });
        }

        Ok(Resolution { order })
    }

    fn visit(
        &self,
        name: &str,
        requester: Option<&str>,
        requested: &BTreeSet<String>,
        walk: &mut Walk,
    ) -> Result<()> {
        match walk.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = walk.stack.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle = walk.stack[start..].to_vec();
                cycle.push(name.to_string());
                return Err(KegError::DependencyCycle { cycle });
            }
            None => {}
        }

        let formula = self.registry.lookup(name).map_err(|e| match e {
            KegError::FormulaNotFound {
                name, suggestion, ..
            } => KegError::FormulaNotFound {
                name,
                required_by: requester.map(str::to_string),
                suggestion,
            },
            other => other,
        })?;

        walk.marks.insert(name.to_string(), Mark::Visiting);
        walk.stack.push(name.to_string());

        let edges = self.edges(formula, requested.contains(name));
        for edge in &edges {
            for req in &edge.requirements {
                walk.constraints
                    .entry(edge.name.clone())
                    .or_default()
                    .push((name.to_string(), req.clone()));
            }
            self.visit(&edge.name, Some(name), requested, walk)?;
        }

        walk.stack.pop();
        walk.marks.insert(name.to_string(), Mark::Done);
        walk.order.push((name.to_string(), edges));
        Ok(())
    }

    /// Filtered, de-duplicated, name-sorted edges out of `formula`
    fn edges(&self, formula: &Formula, is_requested: bool) -> Vec<Edge> {
        let mut by_name: BTreeMap<String, Edge> = BTreeMap::new();

        for dep in formula.dependencies_for(self.env) {
            if dep.external {
                continue;
            }
            let follow = match dep.kind {
                DependencyKind::Build | DependencyKind::Runtime => true,
                DependencyKind::Test => self.options.include_test_deps && is_requested,
            };
            if !follow {
                continue;
            }

            let edge = by_name.entry(dep.name.clone()).or_insert_with(|| Edge {
                name: dep.name.clone(),
                runtime: false,
                requirements: Vec::new(),
            });
            edge.runtime |= dep.kind == DependencyKind::Runtime;
            // a repeated edge keeps every declared requirement
            if let Some(req) = &dep.version {
                edge.requirements.push(req.clone());
            }
        }

        by_name.into_values().collect()
    }

    /// Registry version if it meets every requirement, else the installed one
    fn choose_version(
        &self,
        formula: &Formula,
        constraints: &[(String, VersionReq)],
        installed: Option<&str>,
        forced: bool,
    ) -> Result<Version> {
        let available = formula.pkg_version(self.env);
        if constraints.iter().all(|(_, r)| r.matches(&available)) {
            return Ok(available);
        }

        let installed = installed.map(Version::new);
        if let Some(iv) = installed.as_ref().filter(|_| !forced) {
            if constraints.iter().all(|(_, r)| r.matches(iv)) {
                return Ok(iv.clone());
            }
        }

        let mut candidates = vec![&available];
        if let Some(iv) = &installed {
            candidates.push(iv);
        }

        // Prefer naming two requirers that can never agree
        for (i, (by_a, req_a)) in constraints.iter().enumerate() {
            for (by_b, req_b) in &constraints[i + 1..] {
                if by_a != by_b && !req_a.compatible_with(req_b, &candidates) {
                    return Err(KegError::VersionConflict {
                        formula: formula.name.clone(),
                        first: Requirement {
                            by: by_a.clone(),
                            wants: req_a.to_string(),
                        },
                        second: Requirement {
                            by: by_b.clone(),
                            wants: req_b.to_string(),
                        },
                    });
                }
            }
        }

        let (by, req) = constraints
            .iter()
            .find(|(_, r)| !r.matches(&available))
            .cloned()
            .unwrap_or_else(|| (formula.name.clone(), VersionReq::exact(&available)));
        Err(KegError::VersionConflict {
            formula: formula.name.clone(),
            first: Requirement {
                by,
                wants: req.to_string(),
            },
            second: Requirement {
                by: format!("{} formula", formula.name),
                wants: format!("= {}", available),
            },
        })
    }
}
