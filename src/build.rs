//! Source builds and formula step execution.
//!
//! Steps run synchronously, one after another, in an isolated process
//! environment: the parent environment is cleared and replaced by
//!
//! | Variable          | Value                                          |
//! |-------------------|------------------------------------------------|
//! | `PATH`            | `opt/<dep>/bin` for each dependency, then system dirs |
//! | `HOME`, `TMPDIR`  | inside the build workspace                     |
//! | `PREFIX`          | the keg being populated                        |
//! | `CPPFLAGS`, `LDFLAGS`, `PKG_CONFIG_PATH` | dependency include/lib dirs |
//!
//! Step arguments may use placeholders:
//! `{prefix}`, `{buildpath}`, `{name}`, `{version}`, `{root}`,
//! `{opt:<dep>}` and `{resource:<name>}`. Other brace groups (such as a
//! shell's `${VAR}`) are passed through untouched.

use crate::cellar::Layout;
use crate::error::{KegError, Result};
use crate::extract;
use crate::formula::{Action, Formula, Step};
use crate::platform::{Environment, applies};
use crate::workspace::BuildWorkspace;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

const SYSTEM_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Lines of stderr kept in a step failure
const STDERR_TAIL: usize = 20;

/// Values substituted into step arguments
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<String, String>,
}

impl Placeholders {
    pub fn new(formula: &Formula, env: &Environment, layout: &Layout, keg: &Path, buildpath: &Path) -> Self {
        let mut values = BTreeMap::new();
        values.insert("prefix".into(), keg.display().to_string());
        values.insert("buildpath".into(), buildpath.display().to_string());
        values.insert("name".into(), formula.name.clone());
        values.insert("version".into(), formula.version_for(env).to_string());
        values.insert("root".into(), layout.prefix.display().to_string());
        Self { values }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn expand(&self, s: &str) -> std::result::Result<String, String> {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };

            let key = &after[..end];
            match self.values.get(key) {
                Some(v) => out.push_str(v),
                None if key.starts_with("opt:") || key.starts_with("resource:") => {
                    return Err(format!("unknown placeholder {{{}}}", key));
                }
                None => {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// Cleared-environment variables for build processes
pub fn isolated_env(
    layout: &Layout,
    keg: &Path,
    workspace: &BuildWorkspace,
    dependencies: &[String],
) -> BTreeMap<String, String> {
    let opt: Vec<PathBuf> = dependencies.iter().map(|d| layout.opt(d)).collect();

    let mut path: Vec<String> = opt.iter().map(|o| o.join("bin").display().to_string()).collect();
    path.push(SYSTEM_PATH.to_string());

    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), path.join(":"));
    env.insert("HOME".to_string(), workspace.home().display().to_string());
    env.insert("TMPDIR".to_string(), workspace.tmp().display().to_string());
    env.insert("PREFIX".to_string(), keg.display().to_string());

    if !opt.is_empty() {
        let join = |sub: &str, flag: &str| {
            opt.iter()
                .map(|o| format!("{}{}", flag, o.join(sub).display()))
                .collect::<Vec<_>>()
                .join(if flag.is_empty() { ":" } else { " " })
        };
        env.insert("CPPFLAGS".to_string(), join("include", "-I"));
        env.insert("LDFLAGS".to_string(), join("lib", "-L"));
        env.insert("PKG_CONFIG_PATH".to_string(), join("lib/pkgconfig", ""));
    }

    env
}

/// Executes steps in order, stopping at the first failure
pub struct StepRunner<'a> {
    formula: &'a str,
    placeholders: Placeholders,
    vars: BTreeMap<String, String>,
    workdir: PathBuf,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        formula: &'a str,
        placeholders: Placeholders,
        vars: BTreeMap<String, String>,
        workdir: PathBuf,
    ) -> Self {
        Self {
            formula,
            placeholders,
            vars,
            workdir,
            cancel: None,
        }
    }

    /// Check `flag` before each step and stop once it is set
    pub fn cancel_on(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run `steps` (already filtered for the platform).
    ///
    /// # Errors
    ///
    /// [`KegError::BuildStepFailed`] naming the 1-based step, or
    /// [`KegError::Cancelled`] if cancellation was requested between steps.
    pub fn run<'s>(&mut self, steps: impl IntoIterator<Item = &'s Step>) -> Result<()> {
        for (i, step) in steps.into_iter().enumerate() {
            if self.cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
                return Err(KegError::Cancelled(self.formula.to_string()));
            }
            debug!("{}: step {}: {}", self.formula, i + 1, step.describe());
            self.run_step(step).map_err(|reason| KegError::BuildStepFailed {
                formula: self.formula.to_string(),
                step: i + 1,
                command: step.describe(),
                reason,
            })?;
        }
        Ok(())
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workdir.join(p)
        }
    }

    fn run_step(&mut self, step: &Step) -> std::result::Result<(), String> {
        match &step.action {
            Action::SetEnv { key, value } => {
                let value = self.placeholders.expand(value)?;
                self.vars.insert(key.clone(), value);
            }
            Action::UnsetEnv { key } => {
                self.vars.remove(key);
            }
            Action::Mkdir { path } => {
                let dir = self.resolve(&self.placeholders.expand(path)?);
                fs::create_dir_all(&dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
            }
            Action::Run { args, cwd } => {
                let args = args
                    .iter()
                    .map(|a| self.placeholders.expand(a))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let (program, rest) = args.split_first().ok_or("empty command")?;
                let dir = match cwd {
                    Some(c) => self.resolve(&self.placeholders.expand(c)?),
                    None => self.workdir.clone(),
                };
                fs::create_dir_all(&dir).map_err(|e| format!("{}: {}", dir.display(), e))?;

                let output = Command::new(program)
                    .args(rest)
                    .current_dir(&dir)
                    .env_clear()
                    .envs(&self.vars)
                    .stdin(Stdio::null())
                    .output()
                    .map_err(|e| format!("failed to run {}: {}", program, e))?;

                if !output.status.success() {
                    return Err(format!("{}{}", output.status, stderr_tail(&output.stderr)));
                }
            }
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL);
    format!("\n{}", lines[start..].join("\n"))
}

/// Everything a source build needs, owned so it can move to a blocking thread
pub struct SourceBuild {
    pub formula: Formula,
    pub env: Environment,
    pub layout: Layout,
    pub keg: PathBuf,
    /// Fetched primary source archive
    pub source: PathBuf,
    /// Fetched resources by name
    pub resources: Vec<(String, PathBuf)>,
    pub dependencies: Vec<String>,
    pub cancel: Arc<AtomicBool>,
}

impl SourceBuild {
    /// Unpack sources into `workspace` and run the install steps into the keg
    pub fn run(self, workspace: &BuildWorkspace) -> Result<()> {
        let name = self.formula.name.as_str();
        let source_name = file_name_of(&self.formula.source_for(&self.env).url);
        let buildpath = extract::unpack_source(&self.source, &workspace.src(), &source_name)?;

        let mut placeholders = Placeholders::new(&self.formula, &self.env, &self.layout, &self.keg, &buildpath);
        for (resource, archive) in &self.resources {
            let url = self
                .formula
                .resources
                .iter()
                .find(|r| &r.name == resource)
                .map(|r| file_name_of(&r.source.url))
                .unwrap_or_else(|| resource.clone());
            let dir = extract::unpack_source(archive, &workspace.resources().join(resource), &url)?;
            placeholders.set(format!("resource:{}", resource), dir.display().to_string());
        }
        for dep in &self.dependencies {
            placeholders.set(format!("opt:{}", dep), self.layout.opt(dep).display().to_string());
        }

        fs::create_dir_all(&self.keg)?;
        let vars = isolated_env(&self.layout, &self.keg, workspace, &self.dependencies);
        let steps: Vec<&Step> = self.formula.install_steps(&self.env).collect();
        let step_count = steps.len();

        StepRunner::new(name, placeholders, vars, buildpath)
            .cancel_on(&self.cancel)
            .run(steps)?;

        let empty = fs::read_dir(&self.keg)?.next().is_none();
        if empty {
            return Err(KegError::BuildStepFailed {
                formula: name.to_string(),
                step: step_count,
                command: "install".to_string(),
                reason: "nothing was installed into the keg".to_string(),
            });
        }
        Ok(())
    }
}

/// Run a post-install or test phase against an installed keg
pub fn run_phase(
    formula: &Formula,
    steps: &[Step],
    env: &Environment,
    layout: &Layout,
    keg: &Path,
    dependencies: &[String],
) -> Result<()> {
    let steps: Vec<&Step> = steps.iter().filter(|s| applies(s.when.as_ref(), env)).collect();
    if steps.is_empty() {
        return Ok(());
    }

    let workspace = BuildWorkspace::create(&layout.tmp(), &formula.name)?;
    let mut placeholders = Placeholders::new(formula, env, layout, keg, workspace.path());
    for dep in dependencies {
        placeholders.set(format!("opt:{}", dep), layout.opt(dep).display().to_string());
    }
    let mut vars = isolated_env(layout, keg, &workspace, dependencies);
    // The keg's own tools come first
    if let Some(path) = vars.get_mut("PATH") {
        *path = format!("{}:{}", keg.join("bin").display(), path);
    }

    StepRunner::new(&formula.name, placeholders, vars, workspace.path().to_path_buf()).run(steps)
}

fn file_name_of(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("source")
        .to_string()
}
