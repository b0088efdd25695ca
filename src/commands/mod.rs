//! Command implementations for the `keg` CLI
//!
//! - **install**: resolve, pour or build, and link formulae
//! - **uninstall**: remove kegs and their receipts
//! - **deps**: dependency listing and trees
//! - **info**: formula details and install status
//! - **list**: installed formulae
//! - **test**: run a formula's test steps against its keg

pub mod deps;
pub mod info;
pub mod install;
pub mod list;
pub mod test;
pub mod uninstall;

pub use deps::deps;
pub use info::info;
pub use install::install;
pub use list::list;
pub use test::test;
pub use uninstall::uninstall;

use anyhow::{Context as _, Result};
use kegforge::config::Config;
use kegforge::platform::Environment;
use kegforge::registry::Registry;
use kegforge::{loader, state::InstallState};
use tracing::warn;

/// Everything a command needs, assembled once in `main`
pub struct Context {
    pub config: Config,
    pub registry: Registry,
    pub env: Environment,
}

impl Context {
    pub fn load(config: Config, platform: Option<&str>) -> Result<Self> {
        let env = match platform {
            Some(tag) => {
                let mut env = Environment::from_tag(tag)?;
                // Toolchains are a property of this machine either way
                if let Ok(host) = Environment::detect() {
                    env.toolchains = host.toolchains;
                }
                env
            }
            None => Environment::detect()?,
        };

        let registry = if config.formula_dir.is_dir() {
            loader::load_dir(&config.formula_dir).with_context(|| {
                format!("Failed to load formulae from {}", config.formula_dir.display())
            })?
        } else {
            warn!("Formula directory {} does not exist", config.formula_dir.display());
            Registry::default()
        };
        if let Err(e) = registry.validate() {
            warn!("Formula registry has dangling dependencies: {}", e);
        }

        Ok(Self {
            config,
            registry,
            env,
        })
    }

    pub fn state(&self) -> Result<InstallState> {
        Ok(InstallState::open(self.config.layout.receipts())?)
    }
}
