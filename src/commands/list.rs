use super::Context;
use anyhow::Result;
use colored::Colorize;
use std::io::IsTerminal;

pub fn list(ctx: &Context, show_versions: bool, json: bool) -> Result<()> {
    let is_tty = std::io::stdout().is_terminal();
    let receipts = ctx.state()?.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&receipts)?);
        return Ok(());
    }

    if receipts.is_empty() {
        if is_tty {
            println!("No formulae installed");
        }
        return Ok(());
    }

    // Piped output stays machine readable: one name (and version) per line
    if !is_tty {
        for r in &receipts {
            if show_versions {
                println!("{} {}", r.name, r.version);
            } else {
                println!("{}", r.name);
            }
        }
        return Ok(());
    }

    println!("Installed formulae:");
    for r in &receipts {
        let mut line = r.name.bold().to_string();
        if show_versions {
            line.push_str(&format!(" {}", r.version.dimmed()));
        }
        if !r.installed_on_request {
            line.push_str(&" (dependency)".dimmed().to_string());
        }
        if r.keg_only {
            line.push_str(&" [keg-only]".yellow().to_string());
        }
        println!("  {}", line);
    }
    println!(
        "{} {} formulae",
        "✓".green(),
        receipts.len().to_string().bold()
    );
    Ok(())
}
