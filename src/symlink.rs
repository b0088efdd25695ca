//! Linking kegs into the prefix.
//!
//! Files under a keg's `bin`, `lib`, `share`, ... are exposed as relative
//! symlinks in the matching prefix directory, and `opt/<name>` points at the
//! current keg. Existing files that belong to something else are left alone.

use crate::cellar::Layout;
use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Keg directories mirrored into the prefix
const LINKABLE_DIRS: &[&str] = &["bin", "sbin", "lib", "include", "share", "etc", "Frameworks"];

/// Path to `source` relative to the directory containing `link`.
/// Both must live under `root`.
fn relative_to(source: &Path, link: &Path, root: &Path) -> PathBuf {
    let (Ok(src), Some(Ok(dir))) = (
        source.strip_prefix(root),
        link.parent().map(|p| p.strip_prefix(root)),
    ) else {
        return source.to_path_buf();
    };

    let depth = dir
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    let mut rel = PathBuf::new();
    for _ in 0..depth {
        rel.push("..");
    }
    rel.join(src)
}

fn resolve_link(link: &Path) -> Option<PathBuf> {
    let target = fs::read_link(link).ok()?;
    if target.is_relative() {
        Some(link.parent()?.join(target))
    } else {
        Some(target)
    }
}

/// Lexically normalise `..` segments without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Link a keg's files into the prefix, returning the links created
pub fn link_keg(layout: &Layout, keg: &Path) -> Result<Vec<PathBuf>> {
    let mut linked = Vec::new();

    for dir_name in LINKABLE_DIRS {
        let source_dir = keg.join(dir_name);
        if !source_dir.is_dir() {
            continue;
        }
        let target_dir = layout.prefix.join(dir_name);
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("Failed to create directory: {}", target_dir.display()))?;
        link_directory(layout, &source_dir, &target_dir, &mut linked)?;
    }

    Ok(linked)
}

fn link_directory(
    layout: &Layout,
    source: &Path,
    target: &Path,
    linked: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let source_path = entry.path();
        let target_path = target.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            if target_path.symlink_metadata().is_err() {
                fs::create_dir_all(&target_path)?;
            }
            if target_path.is_dir() && !target_path.is_symlink() {
                link_directory(layout, &source_path, &target_path, linked)?;
                continue;
            }
            warn!("Not linking {}: path is taken", target_path.display());
            continue;
        }

        let relative = relative_to(&source_path, &target_path, layout.prefix());
        if target_path.symlink_metadata().is_ok() {
            // Replace links into older kegs of the same formula; leave the rest
            let ours = resolve_link(&target_path)
                .map(|t| normalize(&t))
                .is_some_and(|t| same_formula(layout, &t, &source_path));
            if !ours {
                warn!("Not linking {}: file exists", target_path.display());
                continue;
            }
            fs::remove_file(&target_path)?;
        }

        unix_fs::symlink(&relative, &target_path).with_context(|| {
            format!(
                "Failed to create symlink: {} -> {}",
                target_path.display(),
                relative.display()
            )
        })?;
        linked.push(target_path);
    }

    Ok(())
}

/// Both paths live under `Cellar/<same name>/`
fn same_formula(layout: &Layout, a: &Path, b: &Path) -> bool {
    let cellar = layout.cellar();
    let name = |p: &Path| {
        p.strip_prefix(&cellar)
            .ok()
            .and_then(|r| r.components().next())
            .map(|c| c.as_os_str().to_owned())
    };
    matches!((name(a), name(b)), (Some(x), Some(y)) if x == y)
}

/// Remove every prefix link that points into `keg`
pub fn unlink_keg(layout: &Layout, keg: &Path) -> Result<Vec<PathBuf>> {
    let mut unlinked = Vec::new();

    for dir_name in LINKABLE_DIRS {
        let source_dir = keg.join(dir_name);
        let target_dir = layout.prefix.join(dir_name);
        if !source_dir.is_dir() || !target_dir.is_dir() {
            continue;
        }
        unlink_directory(&source_dir, &target_dir, keg, &mut unlinked)?;
    }

    Ok(unlinked)
}

fn unlink_directory(
    source: &Path,
    target: &Path,
    keg: &Path,
    unlinked: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let source_path = entry.path();
        let target_path = target.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            if target_path.is_dir() && !target_path.is_symlink() {
                unlink_directory(&source_path, &target_path, keg, unlinked)?;
            }
        } else if let Some(resolved) = resolve_link(&target_path) {
            if normalize(&resolved).starts_with(keg) {
                fs::remove_file(&target_path)?;
                unlinked.push(target_path);
            }
        }
    }

    Ok(())
}

/// Point `opt/<name>` at `keg`
pub fn optlink(layout: &Layout, name: &str, keg: &Path) -> Result<()> {
    let link = layout.opt(name);
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link)
            .with_context(|| format!("Failed to replace {}", link.display()))?;
    }
    let relative = relative_to(keg, &link, layout.prefix());
    unix_fs::symlink(&relative, &link)
        .with_context(|| format!("Failed to create opt link: {}", link.display()))?;
    Ok(())
}

/// Remove `opt/<name>` if it points into `keg`
pub fn remove_optlink(layout: &Layout, name: &str, keg: &Path) -> Result<()> {
    let link = layout.opt(name);
    if resolve_link(&link).is_some_and(|t| normalize(&t) == normalize(keg)) {
        fs::remove_file(&link)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keg_with(layout: &Layout, name: &str, version: &str, files: &[&str]) -> PathBuf {
        let keg = layout.keg(name, version);
        for f in files {
            let p = keg.join(f);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(&p, name).unwrap();
        }
        keg
    }

    #[test]
    fn test_relative_paths() {
        let root = Path::new("/opt/homebrew");
        assert_eq!(
            relative_to(
                Path::new("/opt/homebrew/Cellar/zstd/1.5.0/bin/zstd"),
                Path::new("/opt/homebrew/bin/zstd"),
                root
            ),
            PathBuf::from("../Cellar/zstd/1.5.0/bin/zstd")
        );
        assert_eq!(
            relative_to(
                Path::new("/opt/homebrew/Cellar/zstd/1.5.0/share/man/man1/zstd.1"),
                Path::new("/opt/homebrew/share/man/man1/zstd.1"),
                root
            ),
            PathBuf::from("../../../Cellar/zstd/1.5.0/share/man/man1/zstd.1")
        );
    }

    #[test]
    fn test_link_and_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let keg = keg_with(&layout, "zstd", "1.5.0", &["bin/zstd", "share/man/man1/zstd.1"]);

        let linked = link_keg(&layout, &keg).unwrap();
        assert_eq!(linked.len(), 2);
        let bin = dir.path().join("bin/zstd");
        assert_eq!(fs::read_to_string(&bin).unwrap(), "zstd");
        assert_eq!(
            fs::read_to_string(dir.path().join("share/man/man1/zstd.1")).unwrap(),
            "zstd"
        );

        // relinking is a no-op replacement
        assert_eq!(link_keg(&layout, &keg).unwrap().len(), 2);

        let unlinked = unlink_keg(&layout, &keg).unwrap();
        assert_eq!(unlinked.len(), 2);
        assert!(bin.symlink_metadata().is_err());
    }

    #[test]
    fn test_foreign_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/tool"), "system").unwrap();

        let keg = keg_with(&layout, "tool", "1.0", &["bin/tool"]);
        assert!(link_keg(&layout, &keg).unwrap().is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("bin/tool")).unwrap(), "system");
        assert!(unlink_keg(&layout, &keg).unwrap().is_empty());
    }

    #[test]
    fn test_upgrade_replaces_old_links() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let old = keg_with(&layout, "gmp", "6.2.0", &["lib/libgmp.a"]);
        let new = keg_with(&layout, "gmp", "6.2.1", &["lib/libgmp.a"]);
        fs::write(new.join("lib/libgmp.a"), "new").unwrap();

        link_keg(&layout, &old).unwrap();
        assert_eq!(link_keg(&layout, &new).unwrap().len(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("lib/libgmp.a")).unwrap(), "new");
    }

    #[test]
    fn test_optlink() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted(dir.path());
        let keg = keg_with(&layout, "isl", "0.24", &["lib/libisl.a"]);

        optlink(&layout, "isl", &keg).unwrap();
        assert!(layout.opt("isl").join("lib/libisl.a").exists());

        remove_optlink(&layout, "isl", &keg).unwrap();
        assert!(layout.opt("isl").symlink_metadata().is_err());
    }
}
