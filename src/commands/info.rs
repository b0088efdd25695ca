use super::Context;
use anyhow::Result;
use colored::Colorize;
use kegforge::bottle::{Selection, Selector};
use kegforge::formula::DependencyKind;

pub fn info(ctx: &Context, formula: &str, json: bool) -> Result<()> {
    let f = ctx.registry.lookup(formula)?;

    if json {
        println!("{}", serde_json::to_string_pretty(f)?);
        return Ok(());
    }

    println!("{}", format!("==> {}", f.name).bold().green());
    if let Some(desc) = &f.desc {
        println!("{}", desc);
    }
    if let Some(homepage) = &f.homepage {
        println!("{}: {}", "Homepage".bold(), homepage);
    }
    println!("{}: {}", "Version".bold(), f.pkg_version(&ctx.env));
    if let Some(license) = &f.license {
        println!("{}: {}", "License".bold(), license);
    }
    if f.keg_only {
        println!("{}: not linked into the prefix", "Keg-only".bold().yellow());
    }

    let selection = Selector::new(&ctx.config.layout).select(f, &ctx.env);
    match selection {
        Selection::Bottle(bottle) => println!(
            "{}: {} {}",
            "Bottle".bold(),
            bottle.tag.green(),
            format!("({})", ctx.env.bottle_tag()).dimmed()
        ),
        Selection::Source => println!(
            "{}: none for {}, builds from source",
            "Bottle".bold(),
            ctx.env.bottle_tag()
        ),
    }

    for (kind, title) in [
        (DependencyKind::Runtime, "Dependencies"),
        (DependencyKind::Build, "Build dependencies"),
        (DependencyKind::Test, "Test dependencies"),
    ] {
        let names: Vec<_> = f
            .dependencies_for(&ctx.env)
            .filter(|d| d.kind == kind)
            .map(|d| d.name.as_str())
            .collect();
        if !names.is_empty() {
            println!("{}: {}", title.bold(), names.join(", ").cyan());
        }
    }

    match ctx.state()?.query(formula)? {
        Some(receipt) => {
            println!(
                "{}: {} ({}{})",
                "Installed".bold(),
                receipt.version.green(),
                receipt.method,
                if receipt.installed_on_request {
                    ", on request"
                } else {
                    ", as a dependency"
                }
            );
            println!(
                "  {}",
                ctx.config
                    .layout
                    .keg(&receipt.name, &receipt.version)
                    .display()
                    .to_string()
                    .dimmed()
            );
        }
        None => println!("{}: no", "Installed".bold()),
    }

    Ok(())
}
