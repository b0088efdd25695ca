mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use commands::Context;
use kegforge::config::Config;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "keg")]
#[command(author, version, about = "Resolve, build and install Homebrew-style formulae", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install formulae and their dependencies
    Install {
        /// Formula names
        #[arg(required = true)]
        formulae: Vec<String>,

        /// Reinstall even if already installed
        #[arg(long)]
        force: bool,

        /// Build from source instead of pouring bottles
        #[arg(short = 's', long, conflicts_with = "force_bottle")]
        build_from_source: bool,

        /// Fail instead of building from source
        #[arg(long)]
        force_bottle: bool,

        /// Install for another platform, e.g. arm64_sonoma or x86_64_linux
        #[arg(long)]
        platform: Option<String>,

        /// Maximum formulae installed at once
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Show what would be installed without installing
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Uninstall formulae
    Uninstall {
        /// Formula names
        #[arg(required = true)]
        formulae: Vec<String>,

        /// Ignore dependents (force uninstall)
        #[arg(long)]
        force: bool,
    },

    /// Show dependencies for a formula
    Deps {
        /// Formula name
        formula: String,

        /// Show as tree
        #[arg(long)]
        tree: bool,

        /// Include test dependencies
        #[arg(long)]
        include_test: bool,
    },

    /// Show information about a formula
    Info {
        /// Formula name
        formula: String,

        /// Print the formula definition as JSON
        #[arg(long)]
        json: bool,
    },

    /// List installed formulae
    List {
        /// Show installed versions
        #[arg(long)]
        versions: bool,

        /// Print install receipts as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a formula's test steps against its installed keg
    Test {
        /// Formula name
        formula: String,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "kegforge=debug,keg=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = Config::from_env();

    match cli.command {
        Commands::Install {
            formulae,
            force,
            build_from_source,
            force_bottle,
            platform,
            jobs,
            dry_run,
        } => {
            config.force_reinstall = force;
            config.build_from_source = build_from_source;
            config.force_bottle = force_bottle;
            if let Some(jobs) = jobs {
                config.jobs = jobs.max(1);
            }
            let ctx = Context::load(config, platform.as_deref())?;
            commands::install(ctx, &formulae, dry_run).await
        }
        Commands::Uninstall { formulae, force } => {
            let ctx = Context::load(config, None)?;
            commands::uninstall(&ctx, &formulae, force)
        }
        Commands::Deps {
            formula,
            tree,
            include_test,
        } => {
            let ctx = Context::load(config, None)?;
            commands::deps(&ctx, &formula, tree, include_test)?;
            Ok(true)
        }
        Commands::Info { formula, json } => {
            let ctx = Context::load(config, None)?;
            commands::info(&ctx, &formula, json)?;
            Ok(true)
        }
        Commands::List { versions, json } => {
            let ctx = Context::load(config, None)?;
            commands::list(&ctx, versions, json)?;
            Ok(true)
        }
        Commands::Test { formula } => {
            let ctx = Context::load(config, None)?;
            commands::test(&ctx, &formula)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "keg", &mut std::io::stdout());
            Ok(true)
        }
    }
}
