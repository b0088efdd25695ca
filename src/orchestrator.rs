//! Plan execution: pour bottles, build from source, commit receipts.
//!
//! # Scheduling
//!
//! Each plan entry becomes a task on a [`JoinSet`], with at most `jobs`
//! running at once. An entry starts only after every dependency that is part
//! of the plan has committed its receipt; dependencies outside the plan were
//! already satisfied. Whenever a task finishes the plan is swept in order:
//!
//! ```text
//! pending, a dependency failed   -> skipped (DependencyFailed)
//! pending, cancellation requested -> skipped (Cancelled)
//! pending, all dependencies done  -> spawned, if a slot is free
//! ```
//!
//! Plan order is topological, so one sweep propagates a failure through the
//! whole subgraph above it while unrelated formulae keep going.
//!
//! # Per formula
//!
//! 1. Place the keg: pour the selected bottle, or fetch sources and build.
//!    A bottle that can't be fetched or fails its checksum falls back to a
//!    source build unless bottles are forced.
//! 2. Link it into the prefix, then commit the receipt atomically.
//! 3. Run post-install steps. Failures here become warnings; the install
//!    stands.
//!
//! Any failure before the receipt commit removes the keg, so nothing half
//! installed is ever recorded. A keg being reinstalled in place is moved
//! aside first and put back if its replacement fails.

use crate::bottle::{BottleRef, Plan, PlanEntry, Selection};
use crate::build::{self, SourceBuild};
use crate::cellar::Layout;
use crate::download::{FetchRequest, Fetcher};
use crate::error::{ErrorKind, KegError, Result};
use crate::extract;
use crate::platform::Environment;
use crate::receipt::{InstallReceipt, Method, RuntimeDependency, collect_manifest};
use crate::state::InstallState;
use crate::symlink;
use crate::workspace::BuildWorkspace;
use anyhow::anyhow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A formula that made it into the Cellar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub name: String,
    pub version: String,
    pub method: Method,
    pub keg: PathBuf,
}

/// Outcome of one run, grouped for reporting
#[derive(Debug, Default)]
pub struct InstallSummary {
    pub installed: Vec<Installed>,
    pub failed: Vec<(String, KegError)>,
    /// Not attempted: a dependency failed, or the run was cancelled
    pub skipped: Vec<(String, KegError)>,
    /// Already installed at a satisfying version
    pub satisfied: Vec<String>,
    /// Non-fatal problems, such as post-install failures
    pub warnings: Vec<KegError>,
}

impl InstallSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.installed.iter().any(|i| i.name == name)
    }

    /// Error kind for a formula that failed or was skipped
    pub fn error_kind(&self, name: &str) -> Option<ErrorKind> {
        self.failed
            .iter()
            .chain(&self.skipped)
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.kind())
    }
}

/// Progress notifications, in the order they happen
#[derive(Debug)]
pub enum Event<'a> {
    Started { name: &'a str, method: Method },
    Installed(&'a Installed),
    Failed { name: &'a str, error: &'a KegError },
    Skipped { name: &'a str, error: &'a KegError },
    Warning(&'a KegError),
}

type Listener = Arc<dyn Fn(&Event<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Running,
    Done,
    Failed,
}

struct Inner<F> {
    layout: Layout,
    env: Environment,
    state: Arc<InstallState>,
    fetcher: Arc<F>,
    force_bottle: bool,
    cancel: Arc<AtomicBool>,
    listener: Option<Listener>,
}

pub struct Orchestrator<F> {
    layout: Layout,
    env: Environment,
    state: Arc<InstallState>,
    fetcher: Arc<F>,
    jobs: usize,
    force_bottle: bool,
    cancel: Arc<AtomicBool>,
    listener: Option<Listener>,
}

impl<F: Fetcher> Orchestrator<F> {
    pub fn new(layout: Layout, env: Environment, state: Arc<InstallState>, fetcher: Arc<F>) -> Self {
        Self {
            layout,
            env,
            state,
            fetcher,
            jobs: 1,
            force_bottle: false,
            cancel: Arc::new(AtomicBool::new(false)),
            listener: None,
        }
    }

    /// Maximum formulae installed concurrently
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Never build from source
    pub fn force_bottle(mut self, yes: bool) -> Self {
        self.force_bottle = yes;
        self
    }

    /// Share a cancellation flag, e.g. one set by a Ctrl-C handler
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn on_event(mut self, listener: impl Fn(&Event<'_>) + Send + Sync + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Request cancellation: nothing new starts, running builds stop at
    /// their next step
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn shared(&self) -> Arc<Inner<F>> {
        Arc::new(Inner {
            layout: self.layout.clone(),
            env: self.env.clone(),
            state: Arc::clone(&self.state),
            fetcher: Arc::clone(&self.fetcher),
            force_bottle: self.force_bottle,
            cancel: Arc::clone(&self.cancel),
            listener: self.listener.clone(),
        })
    }

    /// Execute `plan` to completion
    pub async fn execute(&self, plan: Plan) -> InstallSummary {
        let mut summary = InstallSummary {
            satisfied: plan.satisfied.iter().map(|n| n.name.clone()).collect(),
            ..Default::default()
        };

        let entries: Vec<Arc<PlanEntry>> = plan.entries.into_iter().map(Arc::new).collect();
        let index: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name().to_string(), i))
            .collect();
        let mut status = vec![Status::Pending; entries.len()];
        let mut running = JoinSet::new();
        let inner = self.shared();

        loop {
            self.sweep(&inner, &entries, &index, &mut status, &mut running, &mut summary);

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (i, result) = match joined {
                Ok(r) => r,
                Err(e) => {
                    warn!("Install task aborted: {}", e);
                    continue;
                }
            };

            let name = entries[i].name();
            match result {
                Ok((installed, warnings)) => {
                    status[i] = Status::Done;
                    info!("Installed {} {}", installed.name, installed.version);
                    inner.emit(&Event::Installed(&installed));
                    for w in &warnings {
                        inner.emit(&Event::Warning(w));
                    }
                    summary.installed.push(installed);
                    summary.warnings.extend(warnings);
                }
                Err(error) => {
                    status[i] = Status::Failed;
                    if error.kind() == ErrorKind::Cancelled {
                        inner.emit(&Event::Skipped { name, error: &error });
                        summary.skipped.push((name.to_string(), error));
                    } else {
                        warn!("{} failed: {}", name, error);
                        inner.emit(&Event::Failed { name, error: &error });
                        summary.failed.push((name.to_string(), error));
                    }
                }
            }
        }

        // Only reachable if a task panicked
        for (i, s) in status.iter().enumerate() {
            let name = entries[i].name().to_string();
            match s {
                Status::Running => summary
                    .failed
                    .push((name, KegError::Other(anyhow!("install task aborted")))),
                Status::Pending => summary.skipped.push((name.clone(), KegError::Cancelled(name))),
                _ => {}
            }
        }

        summary
    }

    fn sweep(
        &self,
        inner: &Arc<Inner<F>>,
        entries: &[Arc<PlanEntry>],
        index: &HashMap<String, usize>,
        status: &mut [Status],
        running: &mut JoinSet<(usize, Result<(Installed, Vec<KegError>)>)>,
        summary: &mut InstallSummary,
    ) {
        let cancelled = inner.cancelled();

        for (i, entry) in entries.iter().enumerate() {
            if status[i] != Status::Pending {
                continue;
            }
            let name = entry.name();

            let skip = if cancelled {
                Some(KegError::Cancelled(name.to_string()))
            } else {
                entry
                    .node
                    .dependencies
                    .iter()
                    .filter_map(|d| index.get(d))
                    .find(|&&j| status[j] == Status::Failed)
                    .map(|&j| KegError::DependencyFailed {
                        formula: name.to_string(),
                        dependency: entries[j].name().to_string(),
                    })
            };
            if let Some(error) = skip {
                status[i] = Status::Failed;
                debug!("Skipping {}: {}", name, error);
                inner.emit(&Event::Skipped { name, error: &error });
                summary.skipped.push((name.to_string(), error));
                continue;
            }

            let ready = entry
                .node
                .dependencies
                .iter()
                .filter_map(|d| index.get(d))
                .all(|&j| status[j] == Status::Done);
            if !ready || running.len() >= self.jobs {
                continue;
            }

            status[i] = Status::Running;
            let inner = Arc::clone(inner);
            let entry = Arc::clone(entry);
            running.spawn(async move {
                let result = inner.install(&entry).await;
                (i, result)
            });
        }
    }
}

/// Run blocking filesystem or process work off the async workers
async fn blocking<T, G>(what: &str, f: G) -> Result<T>
where
    T: Send + 'static,
    G: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KegError::Other(anyhow!("{} task failed: {}", what, e)))?
}

fn remove_keg(layout: &Layout, keg: &Path) {
    let _ = symlink::unlink_keg(layout, keg);
    if keg.exists() {
        if let Err(e) = fs::remove_dir_all(keg) {
            warn!("Failed to remove {}: {}", keg.display(), e);
        }
    }
}

/// An existing keg moved out of the way while it is replaced. Dropping it
/// deletes the old keg; [`SetAside::restore`] puts it back.
struct SetAside {
    dir: tempfile::TempDir,
}

impl SetAside {
    fn new(layout: &Layout, keg: &Path) -> Result<Self> {
        let tmp = layout.tmp();
        fs::create_dir_all(&tmp)?;
        let dir = tempfile::Builder::new().prefix("keg-").tempdir_in(&tmp)?;
        fs::rename(keg, dir.path().join("keg"))?;
        debug!("Set aside {}", keg.display());
        Ok(Self { dir })
    }

    fn restore(self, layout: &Layout, name: &str, keg: &Path, keg_only: bool) -> Result<()> {
        if keg.exists() {
            fs::remove_dir_all(keg)?;
        }
        fs::rename(self.dir.path().join("keg"), keg)?;
        if !keg_only {
            symlink::link_keg(layout, keg)?;
        }
        symlink::optlink(layout, name, keg)?;
        debug!("Restored {}", keg.display());
        Ok(())
    }
}

impl<F: Fetcher> Inner<F> {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn emit(&self, event: &Event<'_>) {
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }

    async fn install(&self, entry: &PlanEntry) -> Result<(Installed, Vec<KegError>)> {
        let name = entry.name();
        if self.cancelled() {
            return Err(KegError::Cancelled(name.to_string()));
        }

        let keg = self.layout.keg(name, entry.node.version.as_str());
        let aside = if keg.exists() {
            let (layout, keg) = (self.layout.clone(), keg.clone());
            Some(blocking("set aside", move || SetAside::new(&layout, &keg)).await?)
        } else {
            None
        };

        let placed = match self.place(entry, &keg).await {
            Ok((method, bottle_tag)) => self.commit(entry, keg.clone(), method, bottle_tag).await,
            Err(e) => Err(e),
        };
        let installed = match placed {
            Ok(installed) => installed,
            Err(e) => {
                if let Some(aside) = aside {
                    let (layout, name, keg_only) =
                        (self.layout.clone(), name.to_string(), entry.formula.keg_only);
                    let restored =
                        blocking("restore", move || aside.restore(&layout, &name, &keg, keg_only))
                            .await;
                    if let Err(re) = restored {
                        warn!("Failed to restore previous keg of {}: {}", entry.name(), re);
                    }
                }
                return Err(e);
            }
        };
        drop(aside);

        let warnings = self.post_install(entry, &installed.keg).await;
        Ok((installed, warnings))
    }

    /// Put a populated keg at `keg`, returning how it got there
    async fn place(&self, entry: &PlanEntry, keg: &Path) -> Result<(Method, Option<String>)> {
        let name = entry.name();
        let placed = match &entry.selection {
            Selection::Bottle(bottle) => {
                self.emit(&Event::Started {
                    name,
                    method: Method::Bottle,
                });
                match self.pour(entry, bottle, keg).await {
                    Ok(()) => (Method::Bottle, Some(bottle.tag.clone())),
                    Err(e) if self.force_bottle || e.kind() == ErrorKind::Cancelled => return Err(e),
                    Err(e) => {
                        warn!("{}: bottle unusable ({}), building from source", name, e);
                        self.build(entry, keg).await?;
                        (Method::Source, None)
                    }
                }
            }
            Selection::Source if self.force_bottle => {
                return Err(KegError::BottleUnavailable {
                    formula: name.to_string(),
                    tag: self.env.bottle_tag().to_string(),
                });
            }
            Selection::Source => {
                self.emit(&Event::Started {
                    name,
                    method: Method::Source,
                });
                self.build(entry, keg).await?;
                (Method::Source, None)
            }
        };
        Ok(placed)
    }

    /// Fetch and verify a bottle, then unpack it into place
    async fn pour(&self, entry: &PlanEntry, bottle: &BottleRef, keg: &Path) -> Result<()> {
        let request = FetchRequest::new(entry.name(), vec![bottle.url.clone()], &bottle.sha256);
        let archive = self.fetcher.fetch(&request).await?;

        let staging = self.layout.tmp();
        let name = entry.name().to_string();
        let version = entry.node.version.to_string();
        let keg = keg.to_path_buf();
        debug!("Pouring {} from {}", name, archive.display());
        blocking("extract", move || {
            extract::extract_bottle(&archive, &staging, &name, &version, &keg)?;
            Ok(())
        })
        .await
    }

    /// Fetch sources and resources, then run the build in a fresh workspace
    async fn build(&self, entry: &PlanEntry, keg: &Path) -> Result<()> {
        let formula = &entry.formula;
        let name = entry.name();

        let source = formula.source_for(&self.env);
        let source_request = FetchRequest::new(name, source.urls(), &source.sha256);
        let resource_fetches = formula.resources.iter().map(|r| {
            let request = FetchRequest::new(
                format!("{}--{}", name, r.name),
                r.source.urls(),
                &r.source.sha256,
            );
            async move {
                let path = self.fetcher.fetch(&request).await?;
                Ok::<_, KegError>((r.name.clone(), path))
            }
        });
        let (source_path, resources) = tokio::try_join!(
            self.fetcher.fetch(&source_request),
            futures::future::try_join_all(resource_fetches),
        )?;

        if self.cancelled() {
            return Err(KegError::Cancelled(name.to_string()));
        }

        let workspace = BuildWorkspace::create(&self.layout.tmp(), name)?;
        let job = SourceBuild {
            formula: formula.clone(),
            env: self.env.clone(),
            layout: self.layout.clone(),
            keg: keg.to_path_buf(),
            source: source_path,
            resources,
            dependencies: entry.node.dependencies.clone(),
            cancel: Arc::clone(&self.cancel),
        };

        let layout = self.layout.clone();
        let keg = keg.to_path_buf();
        info!("Building {} from source", name);
        blocking("build", move || {
            let result = job.run(&workspace);
            drop(workspace);
            if result.is_err() {
                remove_keg(&layout, &keg);
            }
            result
        })
        .await
    }

    /// Link the keg and commit its receipt; on failure the keg is removed
    async fn commit(
        &self,
        entry: &PlanEntry,
        keg: PathBuf,
        method: Method,
        bottle_tag: Option<String>,
    ) -> Result<Installed> {
        let layout = self.layout.clone();
        let state = Arc::clone(&self.state);
        let env = self.env.clone();
        let node = entry.node.clone();
        let keg_only = entry.formula.keg_only;

        blocking("commit", move || {
            let attempt = || -> Result<Option<InstallReceipt>> {
                let manifest = collect_manifest(&keg)?;
                let previous = state.query(&node.name)?;

                if !keg_only {
                    symlink::link_keg(&layout, &keg)?;
                }
                symlink::optlink(&layout, &node.name, &keg)?;

                let mut runtime_dependencies = Vec::new();
                for dep in &node.runtime_dependencies {
                    let version = state.query(dep)?.map(|r| r.version).unwrap_or_default();
                    runtime_dependencies.push(RuntimeDependency {
                        name: dep.clone(),
                        version,
                    });
                }

                let mut receipt =
                    InstallReceipt::new(&node.name, node.version.as_str(), method, manifest);
                receipt.bottle_tag = bottle_tag;
                receipt.runtime_dependencies = runtime_dependencies;
                receipt.keg_only = keg_only;
                receipt.installed_on_request = node.requested
                    || previous.as_ref().is_some_and(|p| p.installed_on_request);
                receipt.built_on = Some((&env).into());
                state.record(&receipt)?;
                Ok(previous)
            };

            let previous = match attempt() {
                Ok(previous) => previous,
                Err(e) => {
                    remove_keg(&layout, &keg);
                    return Err(e);
                }
            };

            // Retire the keg of a replaced version
            if let Some(prev) = previous.filter(|p| p.version != node.version.as_str()) {
                let old = layout.keg(&node.name, &prev.version);
                remove_keg(&layout, &old);
            }

            Ok(Installed {
                name: node.name,
                version: node.version.to_string(),
                method,
                keg,
            })
        })
        .await
    }

    /// Best-effort post-install hooks; failures come back as warnings
    async fn post_install(&self, entry: &PlanEntry, keg: &Path) -> Vec<KegError> {
        if entry.formula.post_install.is_empty() {
            return Vec::new();
        }

        let formula = entry.formula.clone();
        let env = self.env.clone();
        let layout = self.layout.clone();
        let keg = keg.to_path_buf();
        let deps = entry.node.dependencies.clone();
        let name = formula.name.clone();

        let result = blocking("post-install", move || {
            build::run_phase(&formula, &formula.post_install, &env, &layout, &keg, &deps)
        })
        .await;

        match result {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!("Post-install of {} failed: {}", name, e);
                vec![KegError::PostInstallFailed {
                    formula: name,
                    reason: e.to_string(),
                }]
            }
        }
    }
}
