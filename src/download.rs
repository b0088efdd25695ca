//! Content fetching with checksum verification and a download cache.
//!
//! Every archive the engine touches (source tarballs, resources, bottles)
//! goes through a [`Fetcher`]. The default [`Downloader`] keeps verified
//! files in `<cache>/downloads`, re-verifies cache hits, and tries mirrors in
//! order. Files are written to a `.part` path and only renamed into the cache
//! after their SHA-256 matches, so a corrupt download never becomes a cache
//! hit.

use crate::error::{KegError, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// What to fetch: candidate URLs (primary first) and the expected checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Cache key prefix, usually the formula name
    pub name: String,
    pub urls: Vec<String>,
    pub sha256: String,
}

impl FetchRequest {
    pub fn new(name: impl Into<String>, urls: Vec<String>, sha256: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            urls,
            sha256: sha256.into(),
        }
    }

    /// `<name>--<basename of primary URL>`
    pub fn cache_name(&self) -> String {
        let base = self
            .urls
            .first()
            .map(|u| u.split(['?', '#']).next().unwrap_or(u))
            .and_then(|u| u.rsplit('/').next())
            .filter(|b| !b.is_empty())
            .unwrap_or("download");
        format!("{}--{}", self.name, base)
    }
}

/// Turns a [`FetchRequest`] into a verified local file
pub trait Fetcher: Send + Sync + 'static {
    /// # Errors
    ///
    /// [`KegError::Fetch`] when no URL could be retrieved,
    /// [`KegError::ChecksumMismatch`] when the content is wrong.
    fn fetch(&self, request: &FetchRequest) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// SHA-256 of a file as lowercase hex
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// HTTP(S) and `file://` fetcher backed by a download cache
pub struct Downloader {
    client: reqwest::Client,
    dir: PathBuf,
    progress: Option<MultiProgress>,
}

impl Downloader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            dir: dir.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn retrieve(&self, url: &str, name: &str, dest: &Path) -> Result<()> {
        if let Some(path) = local_path(url) {
            fs::copy(&path, dest).await?;
            return Ok(());
        }

        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let pb = self.progress.as_ref().map(|mp| {
            let pb = mp.add(ProgressBar::new(response.content_length().unwrap_or(0)));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(format!("⬇ {}", name));
            pb
        });

        let mut file = fs::File::create(dest).await?;
        let mut downloaded: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
        }
        file.flush().await?;

        if let Some(pb) = &pb {
            pb.finish_with_message(format!("✓ {}", name));
        }
        Ok(())
    }
}

impl Fetcher for Downloader {
    async fn fetch(&self, request: &FetchRequest) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let dest = self.dir.join(request.cache_name());
        let expected = request.sha256.to_ascii_lowercase();

        if fs::try_exists(&dest).await? {
            if sha256_file(&dest).await? == expected {
                debug!("Cache hit for {}", dest.display());
                return Ok(dest);
            }
            warn!("Discarding corrupt cached download {}", dest.display());
            fs::remove_file(&dest).await?;
        }

        let part = dest.with_file_name(format!("{}.part", request.cache_name()));
        let mut failures = Vec::new();

        for url in &request.urls {
            debug!("Fetching {}", url);
            if let Err(reason) = self.retrieve(url, &request.name, &part).await {
                // transport failures move on to the next mirror
                debug!("Fetch of {} failed: {}", url, reason);
                failures.push(format!("{url}: {reason}"));
                let _ = fs::remove_file(&part).await;
                continue;
            }

            let actual = sha256_file(&part).await?;
            if actual != expected {
                fs::remove_file(&part).await?;
                return Err(KegError::ChecksumMismatch {
                    path: dest,
                    expected,
                    actual,
                });
            }

            fs::rename(&part, &dest).await?;
            return Ok(dest);
        }

        Err(KegError::Fetch {
            url: request
                .urls
                .first()
                .cloned()
                .unwrap_or_else(|| request.name.clone()),
            reason: if failures.is_empty() {
                "no URLs".to_string()
            } else {
                failures.join("; ")
            },
        })
    }
}

/// `file:///x` or a bare absolute path
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        Some(PathBuf::from(path))
    } else if !url.contains("://") {
        Some(PathBuf::from(url))
    } else {
        None
    }
}
