use super::Context;
use anyhow::Result;
use colored::Colorize;
use kegforge::KegError;

pub fn uninstall(ctx: &Context, formula_names: &[String], force: bool) -> Result<bool> {
    if formula_names.is_empty() {
        anyhow::bail!("No formulae specified");
    }

    println!(
        "Uninstalling {} formulae...",
        formula_names.len().to_string().bold()
    );

    let state = ctx.state()?;
    let mut actually_uninstalled = 0;
    let mut ok = true;

    for formula_name in formula_names {
        match kegforge::uninstall::uninstall(&ctx.config.layout, &state, formula_name, force) {
            Ok(removed) => {
                println!(
                    "  Uninstalling {} {}",
                    formula_name.cyan(),
                    removed.receipt.version.dimmed()
                );
                if removed.unlinked > 0 {
                    println!(
                        "    ├ {} Unlinked {} files",
                        "✓".green(),
                        removed.unlinked.to_string().dimmed()
                    );
                }
                println!(
                    "    └ {} Uninstalled {} {}",
                    "✓".green(),
                    formula_name.bold().green(),
                    removed.receipt.version.dimmed()
                );
                actually_uninstalled += 1;
            }
            Err(KegError::NotInstalled(_)) => {
                println!("  {} {} not installed", "⚠".yellow(), formula_name.bold());
            }
            Err(KegError::HasDependents { dependents, .. }) => {
                println!(
                    "  {} Cannot uninstall {} - required by: {}",
                    "⚠".yellow(),
                    formula_name.bold(),
                    dependents.join(", ").cyan()
                );
                println!("    Use {} to force uninstall", "--force".dimmed());
                ok = false;
            }
            Err(e) => {
                println!("  {} {}: {}", "✗".red(), formula_name.bold(), e);
                ok = false;
            }
        }
    }

    if actually_uninstalled > 0 {
        println!(
            "{} Uninstalled {} formula{}",
            "✓".green().bold(),
            actually_uninstalled.to_string().bold(),
            if actually_uninstalled == 1 { "" } else { "e" }
        );
    } else {
        println!("No formulae were uninstalled");
    }

    Ok(ok)
}
