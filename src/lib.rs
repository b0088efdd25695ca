//! kegforge: formula resolution and build orchestration.
//!
//! A run flows through five parts:
//!
//! - [`registry`]: formula definitions, loaded once and read-only
//! - [`resolver`]: expands requests into a dependency-ordered graph
//! - [`bottle`]: picks a precompiled bottle or a source build per formula
//! - [`orchestrator`]: pours, builds and links, in parallel where possible
//! - [`state`]: atomically committed install receipts
//!
//! [`installer::Installer`] wires them together for one run.

pub mod bottle;
pub mod build;
pub mod cellar;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod formula;
pub mod installer;
pub mod loader;
pub mod orchestrator;
pub mod platform;
pub mod receipt;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod symlink;
pub mod uninstall;
pub mod version;
pub mod workspace;

pub use error::{ErrorKind, KegError, Result};
pub use formula::{Dependency, DependencyKind, Formula, Step};
pub use installer::Installer;
pub use platform::Environment;
pub use registry::Registry;
