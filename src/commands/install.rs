use super::Context;
use anyhow::Result;
use colored::Colorize;
use indicatif::MultiProgress;
use kegforge::bottle::{Plan, Selection};
use kegforge::download::Downloader;
use kegforge::orchestrator::{Event, InstallSummary};
use kegforge::Installer;
use std::sync::atomic::Ordering;

/// Install formulae; returns whether every formula made it
pub async fn install(ctx: Context, names: &[String], dry_run: bool) -> Result<bool> {
    if names.is_empty() {
        anyhow::bail!("No formulae specified");
    }

    let progress = MultiProgress::new();
    let downloader = Downloader::new(ctx.config.layout.downloads()).with_progress(progress.clone());
    let installer = Installer::new(ctx.config, ctx.registry, ctx.env, downloader)?;

    println!("Resolving dependencies...");
    let plan = match installer.plan(names) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("{} {} ({})", "✗".red(), e, e.kind().to_string().dimmed());
            return Ok(false);
        }
    };

    if !plan.satisfied.is_empty() {
        println!("Already installed:");
        for node in &plan.satisfied {
            println!("  {} {}", node.name.cyan(), node.version.to_string().dimmed());
        }
    }

    if plan.is_empty() {
        println!("{} Nothing to install", "✓".green());
        println!("  Use {} to reinstall", "--force".dimmed());
        return Ok(true);
    }

    print_plan(&plan);

    if dry_run {
        println!("{} Dry run complete - no formulae were installed", "✓".green());
        return Ok(true);
    }

    let cancel = installer.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Cancelling, waiting for running builds to stop...", "⚠".yellow());
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let printer = progress.clone();
    let summary = installer
        .orchestrator()
        .on_event(move |event| printer.suspend(|| print_event(event)))
        .execute(plan)
        .await;

    print_summary(&summary);
    Ok(summary.is_success())
}

fn print_plan(plan: &Plan) {
    println!(
        "{} formulae to install: {}",
        plan.entries.len().to_string().bold(),
        plan.names().join(", ").cyan()
    );
    for entry in &plan.entries {
        let method = match &entry.selection {
            Selection::Bottle(b) => format!("bottle {}", b.tag),
            Selection::Source => "source".to_string(),
        };
        println!(
            "  {} {} {}",
            entry.name().cyan(),
            entry.node.version.to_string().dimmed(),
            format!("({})", method).dimmed()
        );
    }
}

fn print_event(event: &Event<'_>) {
    match event {
        Event::Started { name, method } => {
            println!("  Installing {} from {}...", name.cyan(), method);
        }
        Event::Installed(installed) => {
            println!(
                "    └ {} Installed {} {}",
                "✓".green(),
                installed.name.bold().green(),
                installed.version.dimmed()
            );
        }
        Event::Failed { name, error } => {
            println!("    └ {} {}: {}", "✗".red(), name.bold(), error);
        }
        Event::Skipped { name, error } => {
            println!("  {} Skipping {}: {}", "⊘".yellow(), name.bold(), error);
        }
        Event::Warning(warning) => {
            println!("    {} {}", "⚠".yellow(), warning);
        }
    }
}

fn print_summary(summary: &InstallSummary) {
    println!();
    if !summary.installed.is_empty() {
        println!(
            "{} Installed {} formula{}",
            "✓".green().bold(),
            summary.installed.len().to_string().bold(),
            if summary.installed.len() == 1 { "" } else { "e" }
        );
    }
    if !summary.satisfied.is_empty() {
        println!(
            "  {} already satisfied: {}",
            summary.satisfied.len().to_string().bold(),
            summary.satisfied.join(", ").dimmed()
        );
    }
    for (name, error) in &summary.failed {
        println!(
            "{} {} failed ({}): {}",
            "✗".red().bold(),
            name.bold(),
            error.kind(),
            error
        );
    }
    for (name, error) in &summary.skipped {
        println!("{} {} skipped ({})", "⊘".yellow(), name.bold(), error.kind());
    }
    for warning in &summary.warnings {
        println!("{} {}", "⚠".yellow(), warning);
    }
}
