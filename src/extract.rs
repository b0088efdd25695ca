//! Archive unpacking for bottles and source tarballs.
//!
//! Bottles are gzip-compressed tarballs laid out as `<name>/<version>/...`:
//!
//! ```text
//! zstd--1.5.0.arm64_sonoma.bottle.tar.gz
//!   zstd/1.5.0/bin/zstd
//!   zstd/1.5.0/lib/libzstd.dylib
//! ```
//!
//! They are unpacked into a staging directory next to the Cellar and renamed
//! into place, so a failed or interrupted pour never leaves a half-populated
//! keg. The version directory inside the archive may carry a bottle revision
//! suffix (`1.5.0_1`); it is poured into the formula's own keg path either way.

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use xz2::read::XzDecoder;

/// Unpack a bottle and move its keg to `keg`.
///
/// `staging` must be on the same filesystem as `keg`.
pub fn extract_bottle(
    bottle_path: &Path,
    staging: &Path,
    formula_name: &str,
    version: &str,
    keg: &Path,
) -> Result<()> {
    fs::create_dir_all(staging)
        .with_context(|| format!("Failed to create staging directory: {}", staging.display()))?;
    let scratch = tempfile::TempDir::new_in(staging)?;

    let file = fs::File::open(bottle_path)
        .with_context(|| format!("Failed to open bottle: {}", bottle_path.display()))?;
    Archive::new(GzDecoder::new(file))
        .unpack(scratch.path())
        .with_context(|| format!("Failed to extract bottle: {}", bottle_path.display()))?;

    let unpacked = find_version_dir(&scratch.path().join(formula_name), version)?;

    if keg.exists() {
        fs::remove_dir_all(keg)
            .with_context(|| format!("Failed to remove old keg: {}", keg.display()))?;
    }
    if let Some(parent) = keg.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&unpacked, keg)
        .with_context(|| format!("Failed to move keg into place: {}", keg.display()))?;

    Ok(())
}

/// `version` or `version_N` under `formula_dir`
fn find_version_dir(formula_dir: &Path, version: &str) -> Result<PathBuf> {
    let exact = formula_dir.join(version);
    if exact.is_dir() {
        return Ok(exact);
    }

    let prefix = format!("{}_", version);
    let found = fs::read_dir(formula_dir)
        .with_context(|| format!("Bottle has no {} directory", formula_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|p| {
            p.is_dir()
                && p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
        });

    match found {
        Some(p) => Ok(p),
        None => bail!(
            "Extraction failed: no directory matching version {} in bottle",
            version
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    TarGz,
    TarXz,
    Tar,
    Bzip2,
    Plain,
}

const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0x00];

fn sniff(path: &Path) -> Result<ArchiveFormat> {
    let mut header = [0u8; 262];
    let mut file = fs::File::open(path)?;
    let n = file.read(&mut header)?;
    if n >= 2 && header[0] == 0x1f && header[1] == 0x8b {
        Ok(ArchiveFormat::TarGz)
    } else if n >= 6 && header[..6] == XZ_MAGIC {
        Ok(ArchiveFormat::TarXz)
    } else if n >= 3 && &header[..3] == b"BZh" {
        Ok(ArchiveFormat::Bzip2)
    } else if n >= 262 && &header[257..262] == b"ustar" {
        Ok(ArchiveFormat::Tar)
    } else {
        Ok(ArchiveFormat::Plain)
    }
}

/// Stage a source download into `dest`, returning the build directory.
///
/// Tarballs are unpacked; when they hold a single top-level directory that
/// directory is the build directory. Gzip and xz compression are supported;
/// bzip2 archives are rejected. Anything else is copied in as-is.
pub fn unpack_source(archive: &Path, dest: &Path, file_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;
    match sniff(archive)? {
        ArchiveFormat::TarGz => {
            let file = fs::File::open(archive)?;
            Archive::new(GzDecoder::new(file))
                .unpack(dest)
                .with_context(|| format!("Failed to unpack {}", archive.display()))?;
        }
        ArchiveFormat::TarXz => {
            let file = fs::File::open(archive)?;
            Archive::new(XzDecoder::new(file))
                .unpack(dest)
                .with_context(|| format!("Failed to unpack {}", archive.display()))?;
        }
        ArchiveFormat::Bzip2 => {
            bail!("Unsupported archive format (bzip2): {}", file_name);
        }
        ArchiveFormat::Tar => {
            let file = fs::File::open(archive)?;
            Archive::new(file)
                .unpack(dest)
                .with_context(|| format!("Failed to unpack {}", archive.display()))?;
        }
        ArchiveFormat::Plain => {
            fs::copy(archive, dest.join(file_name))
                .with_context(|| format!("Failed to stage {}", archive.display()))?;
            return Ok(dest.to_path_buf());
        }
    }

    let entries: Vec<PathBuf> = fs::read_dir(dest)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(dest.to_path_buf()),
    }
}
