use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{DirToolCache, ToolCache};
use crate::downloader::Downloader;
use crate::error::{Error, Result};
use crate::progress::{default_progress_fn, ProgressFn};
use crate::provider::{select_provider, Platform, ProviderContext, ReleaseProvider};
use crate::release::{InstallRequest, InstallResult};
use crate::resolve::resolve;
use crate::retry::{with_retry, RetryPolicy};

// ──────────────────────────────────────────────────────────────────────────────
// Installer
// ──────────────────────────────────────────────────────────────────────────────

/// Top-level entry-point with a chainable builder API.
///
/// # Example
/// ```rust,no_run
/// use setup_ffmpeg::{InstallRequest, Installer};
///
/// #[tokio::main]
/// async fn main() {
///     let installed = Installer::new()
///         .set_tool_cache_dir("./toolcache")
///         .install(InstallRequest::new("release"))
///         .await
///         .unwrap();
///     println!("ffmpeg {} at {}", installed.version, installed.path.display());
/// }
/// ```
pub struct Installer {
    platform: Option<String>,
    tool_cache: Arc<dyn ToolCache>,
    retry: RetryPolicy,
    proxy: Option<String>,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
}

impl Installer {
    /// Create a new `Installer` with sensible defaults.
    ///
    /// The tool cache root comes from `RUNNER_TOOL_CACHE` and the proxy from
    /// `HTTP_PROXY` / `HTTPS_PROXY`.
    pub fn new() -> Self {
        let proxy = std::env::var("HTTP_PROXY")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("HTTPS_PROXY").ok().filter(|s| !s.is_empty()));

        let tool_cache = DirToolCache::from_env();
        debug!(root = %tool_cache.root().display(), "Default tool cache");

        Self {
            platform: None,
            tool_cache: Arc::new(tool_cache),
            retry: RetryPolicy::default(),
            proxy,
            progress: Some(default_progress_fn()),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the platform identifier (defaults to the host OS).
    pub fn set_platform(mut self, platform: &str) -> Self {
        self.platform = Some(platform.to_owned());
        self
    }

    /// Use a directory-backed tool cache rooted at `dir` (builder).
    pub fn set_tool_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let cache = DirToolCache::new(dir);
        debug!(root = %cache.root().display(), "Using tool cache directory");
        self.tool_cache = Arc::new(cache);
        self
    }

    /// Use a custom tool cache implementation (builder).
    pub fn set_tool_cache(mut self, cache: Arc<dyn ToolCache>) -> Self {
        self.tool_cache = cache;
        self
    }

    pub fn set_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the number of attempts for release lookups (builder).
    pub fn set_max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    /// Set the base backoff delay for release lookups (builder).
    pub fn set_initial_delay(mut self, delay: Duration) -> Self {
        self.retry.initial_delay = delay;
        self
    }

    /// Set an explicit HTTP/HTTPS proxy URL (builder).
    pub fn set_proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_owned());
        self
    }

    /// Override the progress callback (builder).
    pub fn set_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Disable progress output (builder).
    pub fn no_progress(mut self) -> Self {
        self.progress = None;
        self
    }

    /// Abort lookups, backoff sleeps and downloads when `token` is cancelled.
    pub fn set_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn provider_context(&self) -> ProviderContext {
        ProviderContext {
            downloader: Downloader::with_config(self.proxy.clone(), self.progress.clone()),
            cache: self.tool_cache.clone(),
        }
    }

    /// Install the build described by `request` for the running platform.
    pub async fn install(&self, request: InstallRequest) -> Result<InstallResult> {
        let platform = match &self.platform {
            Some(platform) => platform.clone(),
            None => Platform::current()?.to_string(),
        };
        let provider = select_provider(&platform, &request, self.provider_context())?;
        self.install_with(provider.as_ref(), &request).await
    }

    /// Install through an explicit provider.
    ///
    /// A `git`/`release` request fetches the latest build first; the cache
    /// is consulted before any release listing or download happens.
    pub async fn install_with(
        &self,
        provider: &dyn ReleaseProvider,
        request: &InstallRequest,
    ) -> Result<InstallResult> {
        let mut release = None;
        let mut version = request.version.clone();

        if request.is_latest() {
            let latest = with_retry(&self.retry, &self.cancel, || provider.latest_release()).await?;
            version = latest.version.clone();
            release = Some(latest);
        }

        info!(
            tool = %request.cache_key,
            %version,
            arch = %request.architecture,
            "Checking tool cache"
        );
        if let Some(hit) = self
            .tool_cache
            .find(&request.cache_key, &version, &request.architecture)
        {
            info!("Using ffmpeg version {} from tool cache", hit.version);
            return Ok(InstallResult {
                version: hit.version,
                path: hit.path,
                cache_hit: true,
            });
        }

        let release = match release {
            Some(release) => release,
            None => {
                with_retry(&self.retry, &self.cancel, || async move {
                    let releases = provider.available_releases().await?;
                    resolve(&request.version, &releases)
                })
                .await?
            }
        };

        info!(
            "Installing ffmpeg version {} from {}",
            release.version,
            release.download_urls.join(", ")
        );
        let tool = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            tool = provider.download_tool(&release) => tool?,
        };
        Ok(InstallResult::downloaded(tool))
    }
}

impl Default for Installer {
    fn default() -> Self {
        Self::new()
    }
}
