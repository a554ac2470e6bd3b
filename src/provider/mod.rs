//! Platform-specific sources of ffmpeg builds.
//!
//! Each supported platform has exactly one [`ReleaseProvider`]; the
//! installer only talks to the trait and never inspects which one it holds.

mod evermeet;
mod gyan;
mod johnvansickle;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::ToolCache;
use crate::downloader::{extract, Downloader};
use crate::error::{Error, Result};
use crate::release::{InstallRequest, InstalledTool, ReleaseDescriptor};

pub use evermeet::EvermeetCxProvider;
pub use gyan::GyanProvider;
pub use johnvansickle::JohnVanSickleProvider;

/// Lists and downloads builds for one platform.
#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Every release the source currently offers.
    async fn available_releases(&self) -> Result<Vec<ReleaseDescriptor>>;

    /// The newest build: the git snapshot when `git` was requested,
    /// otherwise the newest stable release.
    async fn latest_release(&self) -> Result<ReleaseDescriptor>;

    /// Download, verify, extract and cache `release`.
    async fn download_tool(&self, release: &ReleaseDescriptor) -> Result<InstalledTool>;
}

/// Operating systems with a release provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    /// The host platform.
    pub fn current() -> Result<Self> {
        std::env::consts::OS.parse()
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "windows" | "win32" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "darwin" => Ok(Self::MacOs),
            _ => Err(Error::UnsupportedPlatform {
                platform: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => f.write_str("windows"),
            Self::Linux => f.write_str("linux"),
            Self::MacOs => f.write_str("macos"),
        }
    }
}

/// Collaborators every concrete provider needs.
#[derive(Clone)]
pub struct ProviderContext {
    pub downloader: Downloader,
    pub cache: Arc<dyn ToolCache>,
}

/// Build the provider for `platform`, forwarding the request options.
pub fn select_provider(
    platform: &str,
    options: &InstallRequest,
    ctx: ProviderContext,
) -> Result<Box<dyn ReleaseProvider>> {
    let platform: Platform = platform.parse()?;
    let provider: Box<dyn ReleaseProvider> = match platform {
        Platform::Windows => Box::new(GyanProvider::new(options.clone(), ctx)?),
        Platform::Linux => Box::new(JohnVanSickleProvider::new(options.clone(), ctx)?),
        Platform::MacOs => Box::new(EvermeetCxProvider::new(options.clone(), ctx)?),
    };
    debug!(%platform, provider = provider.name(), "Selected release provider");
    Ok(provider)
}

/// Scratch directory for one download, removed on drop.
pub(crate) struct Staging {
    root: PathBuf,
}

impl Staging {
    pub(crate) fn new(options: &InstallRequest, version: &str) -> Result<Self> {
        let dir_name = format!(
            "{}-{}-{}-{}",
            options.cache_key,
            sanitize(version),
            options.architecture,
            std::process::id()
        );
        let root = std::env::temp_dir().join("setup-ffmpeg").join(dir_name);
        if root.exists() {
            std::fs::remove_dir_all(&root)?;
        }
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub(crate) fn extracted(&self) -> PathBuf {
        self.root.join("extracted")
    }

    /// Download the first reachable url, check its digest and unpack it
    /// into [`Staging::extracted`].
    pub(crate) async fn fetch(
        &self,
        downloader: &Downloader,
        options: &InstallRequest,
        urls: &[String],
        checksum_urls: Option<&[String]>,
        strip_components: usize,
    ) -> Result<()> {
        let archive = downloader
            .download_first(urls, &self.root.join("download"))
            .await?;

        match checksum_urls {
            _ if options.skip_integrity_check => {
                debug!(archive = %archive.display(), "Integrity check skipped by request");
            }
            Some(checksums) if !checksums.is_empty() => {
                downloader.verify_checksum(&archive, checksums).await?;
            }
            _ => {
                warn!(
                    archive = %archive.display(),
                    "No checksum published, skipping integrity check"
                );
            }
        }

        extract(&archive, &self.extracted(), strip_components)?;
        std::fs::remove_file(&archive)?;
        Ok(())
    }

    /// Move the extracted build into the tool cache.
    pub(crate) fn commit(
        &self,
        cache: &dyn ToolCache,
        options: &InstallRequest,
        version: &str,
    ) -> Result<PathBuf> {
        cache.cache_dir(
            &self.extracted(),
            &options.cache_key,
            version,
            &options.architecture,
        )
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            debug!(dir = %self.root.display(), error = %e, "Could not remove staging directory");
        }
    }
}

fn sanitize(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Last path segment of a url.
pub(crate) fn file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("expected directory {}", path.display()),
        )))
    }
}
