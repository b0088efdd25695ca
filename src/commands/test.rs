use super::Context;
use anyhow::Result;
use colored::Colorize;
use kegforge::build;
use kegforge::formula::DependencyKind;

/// Run the test steps of an installed formula against its keg
pub fn test(ctx: &Context, formula: &str) -> Result<bool> {
    let f = ctx.registry.lookup(formula)?;
    let Some(receipt) = ctx.state()?.query(formula)? else {
        println!("  {} {} not installed", "⚠".yellow(), formula.bold());
        return Ok(false);
    };

    if f.test.is_empty() {
        println!("{} {} defines no test", "⚠".yellow(), formula.bold());
        return Ok(true);
    }

    let layout = &ctx.config.layout;
    let keg = layout.keg(&receipt.name, &receipt.version);
    let deps: Vec<String> = f
        .dependencies_for(&ctx.env)
        .filter(|d| !d.external && d.kind != DependencyKind::Build)
        .map(|d| d.name.clone())
        .collect();

    println!("Testing {} {}", formula.cyan(), receipt.version.dimmed());
    match build::run_phase(f, &f.test, &ctx.env, layout, &keg, &deps) {
        Ok(()) => {
            println!("  └ {} {} passed", "✓".green(), formula.bold().green());
            Ok(true)
        }
        Err(e) => {
            println!("  └ {} {}", "✗".red(), e);
            Ok(false)
        }
    }
}
