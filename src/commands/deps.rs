use super::Context;
use anyhow::Result;
use colored::Colorize;
use kegforge::formula::DependencyKind;
use kegforge::resolver::{ResolveOptions, Resolver};
use std::collections::BTreeSet;
use std::io::IsTerminal;

pub fn deps(ctx: &Context, formula: &str, tree: bool, include_test: bool) -> Result<()> {
    let is_tty = std::io::stdout().is_terminal();
    let root = ctx.registry.lookup(formula)?;

    if tree {
        println!("{}", root.name.bold());
        let mut seen = BTreeSet::new();
        print_tree(ctx, formula, "", include_test, &mut seen)?;
        return Ok(());
    }

    let resolution = Resolver::new(&ctx.registry, &ctx.env)
        .with_state(&ctx.state()?)?
        .with_options(ResolveOptions {
            force_reinstall: false,
            include_test_deps: include_test,
        })
        .resolve(&[formula.to_string()])?;

    let deps: Vec<_> = resolution.order.iter().filter(|n| n.name != formula).collect();
    if deps.is_empty() {
        if is_tty {
            println!("{} No dependencies", "✓".green());
        }
        return Ok(());
    }

    for dep in deps {
        if is_tty {
            let mark = if dep.satisfied {
                "✓".green().to_string()
            } else {
                " ".to_string()
            };
            println!("{} {} {}", mark, dep.name.cyan(), dep.version.to_string().dimmed());
        } else {
            println!("{}", dep.name);
        }
    }
    Ok(())
}

/// Print the edges under `name`. A formula already expanded elsewhere in
/// the tree is shown once more, marked, but not expanded again.
fn print_tree(
    ctx: &Context,
    name: &str,
    indent: &str,
    include_test: bool,
    seen: &mut BTreeSet<String>,
) -> Result<()> {
    let formula = ctx.registry.lookup(name)?;
    let edges: Vec<_> = formula
        .dependencies_for(&ctx.env)
        .filter(|d| include_test || d.kind != DependencyKind::Test)
        .collect();

    let len = edges.len();
    for (i, dep) in edges.into_iter().enumerate() {
        let last = i == len - 1;
        let branch = if last { "└── " } else { "├── " };
        let mut label = dep.name.cyan().to_string();
        match dep.kind {
            DependencyKind::Build => label.push_str(&" (build)".dimmed().to_string()),
            DependencyKind::Test => label.push_str(&" (test)".dimmed().to_string()),
            DependencyKind::Runtime => {}
        }
        if dep.external {
            label.push_str(&" (system)".dimmed().to_string());
        }

        let expand = !dep.external && seen.insert(dep.name.clone());
        if !dep.external && !expand {
            label.push_str(&" (*)".dimmed().to_string());
        }
        println!("{}{}{}", indent, branch, label);

        if expand {
            let child = format!("{}{}", indent, if last { "    " } else { "│   " });
            print_tree(ctx, &dep.name, &child, include_test, seen)?;
        }
    }
    Ok(())
}
