//! One install run: resolve, select, execute.
//!
//! Resolution errors come back as `Err` before anything touches the prefix.
//! Everything after that (fetch, build and post-install problems) is
//! reported per formula in the [`InstallSummary`].

use crate::bottle::{Plan, Selector};
use crate::config::Config;
use crate::download::Fetcher;
use crate::error::Result;
use crate::orchestrator::{InstallSummary, Orchestrator};
use crate::platform::Environment;
use crate::registry::Registry;
use crate::resolver::{ResolveOptions, Resolver};
use crate::state::InstallState;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::debug;

pub struct Installer<F> {
    config: Config,
    registry: Registry,
    env: Environment,
    state: Arc<InstallState>,
    fetcher: Arc<F>,
    cancel: Arc<AtomicBool>,
}

impl<F: Fetcher> Installer<F> {
    pub fn new(config: Config, registry: Registry, env: Environment, fetcher: F) -> Result<Self> {
        let state = Arc::new(InstallState::open(config.layout.receipts())?);
        Ok(Self {
            config,
            registry,
            env,
            state,
            fetcher: Arc::new(fetcher),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn state(&self) -> &Arc<InstallState> {
        &self.state
    }

    /// Flag that stops the run when set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Resolve `names` and choose an install method for each pending formula
    pub fn plan(&self, names: &[String]) -> Result<Plan> {
        let resolution = Resolver::new(&self.registry, &self.env)
            .with_state(&self.state)?
            .with_options(ResolveOptions {
                force_reinstall: self.config.force_reinstall,
                include_test_deps: false,
            })
            .resolve(names)?;
        debug!("Resolved {:?}", resolution.names());

        Selector::new(&self.config.layout)
            .build_from_source(self.config.build_from_source)
            .annotate(&resolution, &self.registry, &self.env)
    }

    /// Orchestrator configured for this run
    pub fn orchestrator(&self) -> Orchestrator<F> {
        Orchestrator::new(
            self.config.layout.clone(),
            self.env.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.fetcher),
        )
        .jobs(self.config.jobs)
        .force_bottle(self.config.force_bottle)
        .cancel_flag(Arc::clone(&self.cancel))
    }

    pub async fn install(&self, names: &[String]) -> Result<InstallSummary> {
        let plan = self.plan(names)?;
        Ok(self.orchestrator().execute(plan).await)
    }
}
