/// Integration tests for the install flow.
///
/// Most tests drive `Installer::install_with` through an in-memory provider
/// and cache. Tests that hit the real release sources are ignored by
/// default; run them with `cargo test -- --include-ignored`.
#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use setup_ffmpeg::{
        CachedTool, DirToolCache, Error, InstallRequest, InstalledTool, Installer,
        ReleaseDescriptor, ReleaseProvider, Result, RetryPolicy, ToolCache,
    };
    use tokio_util::sync::CancellationToken;

    // ──────────────────────────────────────────────────────────────────────
    // Fakes
    // ──────────────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<(String, String, String), PathBuf>>,
        lookups: AtomicU32,
    }

    impl MemoryCache {
        fn insert(&self, tool: &str, version: &str, arch: &str, path: &Path) {
            self.entries.lock().unwrap().insert(
                (tool.to_owned(), version.to_owned(), arch.to_owned()),
                path.to_owned(),
            );
        }
    }

    impl ToolCache for MemoryCache {
        fn find(&self, tool: &str, version: &str, arch: &str) -> Option<CachedTool> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.entries
                .lock()
                .unwrap()
                .get(&(tool.to_owned(), version.to_owned(), arch.to_owned()))
                .map(|path| CachedTool {
                    version: version.to_owned(),
                    path: path.clone(),
                })
        }

        fn cache_dir(
            &self,
            source: &Path,
            tool: &str,
            version: &str,
            arch: &str,
        ) -> Result<PathBuf> {
            self.insert(tool, version, arch, source);
            Ok(source.to_owned())
        }
    }

    struct FakeProvider {
        releases: Vec<ReleaseDescriptor>,
        latest: ReleaseDescriptor,
        cache: Arc<dyn ToolCache>,
        staging: PathBuf,
        /// Listing fails this many times before succeeding.
        listing_failures: AtomicU32,
        /// Latest-release lookups fail this many times before succeeding.
        latest_failures: AtomicU32,
        fail_download: bool,
        list_calls: AtomicU32,
        latest_calls: AtomicU32,
        downloaded: Mutex<Vec<ReleaseDescriptor>>,
    }

    impl FakeProvider {
        fn new(versions: &[&str], latest: &str, cache: Arc<dyn ToolCache>, staging: &Path) -> Self {
            Self {
                releases: versions.iter().map(|v| release(v)).collect(),
                latest: release(latest),
                cache,
                staging: staging.to_owned(),
                listing_failures: AtomicU32::new(0),
                latest_failures: AtomicU32::new(0),
                fail_download: false,
                list_calls: AtomicU32::new(0),
                latest_calls: AtomicU32::new(0),
                downloaded: Mutex::new(Vec::new()),
            }
        }

        fn failing_listing(self, times: u32) -> Self {
            self.listing_failures.store(times, Ordering::SeqCst);
            self
        }

        fn failing_latest(self, times: u32) -> Self {
            self.latest_failures.store(times, Ordering::SeqCst);
            self
        }

        fn network_calls(&self) -> u32 {
            self.list_calls.load(Ordering::SeqCst)
                + self.latest_calls.load(Ordering::SeqCst)
                + self.downloaded.lock().unwrap().len() as u32
        }

        fn downloaded_versions(&self) -> Vec<String> {
            self.downloaded
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.version.clone())
                .collect()
        }
    }

    fn release(version: &str) -> ReleaseDescriptor {
        ReleaseDescriptor::new(
            version,
            vec![format!("https://builds.invalid/ffmpeg-{version}.tar.xz")],
        )
    }

    fn transient() -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }

    #[async_trait]
    impl ReleaseProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn available_releases(&self) -> Result<Vec<ReleaseDescriptor>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.listing_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.listing_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(transient());
            }
            Ok(self.releases.clone())
        }

        async fn latest_release(&self) -> Result<ReleaseDescriptor> {
            self.latest_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.latest_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.latest_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(transient());
            }
            Ok(self.latest.clone())
        }

        async fn download_tool(&self, release: &ReleaseDescriptor) -> Result<InstalledTool> {
            self.downloaded.lock().unwrap().push(release.clone());
            if self.fail_download {
                return Err(Error::HttpStatus {
                    url: release.download_urls[0].clone(),
                    status: reqwest::StatusCode::NOT_FOUND,
                });
            }
            let extracted = self.staging.join(&release.version);
            std::fs::create_dir_all(&extracted)?;
            std::fs::write(extracted.join("ffmpeg"), b"#!/bin/sh\n")?;
            let path = self.cache.cache_dir(&extracted, "ffmpeg", &release.version, "x64")?;
            Ok(InstalledTool {
                version: release.version.clone(),
                path,
            })
        }
    }

    fn installer(cache: Arc<dyn ToolCache>) -> Installer {
        Installer::new().no_progress().set_tool_cache(cache)
    }

    fn request(version: &str) -> InstallRequest {
        InstallRequest::new(version).architecture("x64")
    }

    // ──────────────────────────────────────────────────────────────────────
    // Scenarios
    // ──────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn exact_version_is_downloaded_on_cache_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let versions = ["5.0.0", "5.1.2", "5.1.3"];
        let provider = FakeProvider::new(&versions, "6.0.0", cache.clone(), tmp.path());

        let result = installer(cache.clone())
            .install_with(&provider, &request("5.1.2"))
            .await
            .unwrap();

        assert_eq!(result.version, "5.1.2");
        assert_eq!(result.path, tmp.path().join("5.1.2"));
        assert!(!result.cache_hit);
        assert_eq!(provider.downloaded_versions(), ["5.1.2"]);
        assert_eq!(provider.latest_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn release_sentinel_hits_cache_without_download() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let cached = tmp.path().join("cached-6.0.0");
        cache.insert("ffmpeg", "6.0.0", "x64", &cached);
        let provider = FakeProvider::new(&["5.1.2"], "6.0.0", cache.clone(), tmp.path());

        let result = installer(cache.clone())
            .install_with(&provider, &request("release"))
            .await
            .unwrap();

        assert_eq!(result.version, "6.0.0");
        assert_eq!(result.path, cached);
        assert!(result.cache_hit);
        assert_eq!(provider.latest_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 0);
        assert!(provider.downloaded_versions().is_empty());
    }

    #[tokio::test]
    async fn caret_range_selects_highest_match() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let provider = FakeProvider::new(&["3.9.0", "4.2.0"], "6.0.0", cache.clone(), tmp.path());

        let result = installer(cache.clone())
            .install_with(&provider, &request("^4.0.0"))
            .await
            .unwrap();

        assert_eq!(result.version, "4.2.0");
        assert_eq!(provider.downloaded_versions(), ["4.2.0"]);
    }

    #[tokio::test]
    async fn git_sentinel_is_case_insensitive_and_downloads_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let mut provider = FakeProvider::new(&["6.0.0"], "6.0.0", cache.clone(), tmp.path());
        provider.latest = release("2024-03-01-git-a1b2c3d4e5").git_build();

        let result = installer(cache.clone())
            .install_with(&provider, &request("GIT"))
            .await
            .unwrap();

        assert_eq!(result.version, "2024-03-01-git-a1b2c3d4e5");
        assert!(!result.cache_hit);
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.downloaded_versions(), ["2024-03-01-git-a1b2c3d4e5"]);
    }

    #[tokio::test]
    async fn second_install_is_served_from_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let provider = FakeProvider::new(&["6.1.1"], "6.1.1", cache.clone(), tmp.path());
        let installer = installer(cache.clone());

        let first = installer.install_with(&provider, &request("6.1.1")).await.unwrap();
        assert!(!first.cache_hit);
        let calls_after_first = provider.network_calls();

        let second = installer.install_with(&provider, &request("6.1.1")).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.version, first.version);
        assert_eq!(second.path, first.path);
        assert_eq!(provider.network_calls(), calls_after_first);
        assert_eq!(cache.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn directory_cache_short_circuits_ranges() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(DirToolCache::new(tmp.path().join("toolcache")));
        let stage = tmp.path().join("stage");
        let provider = FakeProvider::new(&["5.1.2", "6.0.0"], "6.0.0", cache.clone(), &stage);
        let installer = installer(cache.clone());

        let first = installer.install_with(&provider, &request("^5")).await.unwrap();
        assert_eq!(first.version, "5.1.2");
        assert!(first.path.join("ffmpeg").is_file());
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);

        let second = installer.install_with(&provider, &request("^5")).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.version, "5.1.2");
        assert_eq!(second.path, first.path);
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);
    }

    // ──────────────────────────────────────────────────────────────────────
    // Retry and error propagation
    // ──────────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn transient_listing_failures_are_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let provider =
            FakeProvider::new(&["6.0.0"], "6.0.0", cache.clone(), tmp.path()).failing_listing(2);

        let result = installer(cache.clone())
            .install_with(&provider, &request("^6"))
            .await
            .unwrap();

        assert_eq!(result.version, "6.0.0");
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_listing_failure_exhausts_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let provider = FakeProvider::new(&["6.0.0"], "6.0.0", cache.clone(), tmp.path())
            .failing_listing(u32::MAX);

        let result = installer(cache.clone())
            .install_with(&provider, &request("^6"))
            .await;

        match result {
            Err(Error::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 5);
                assert!(matches!(*source, Error::Io(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 5);
        assert!(provider.downloaded_versions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_latest_release_failures_are_retried() {
        for sentinel in ["release", "git"] {
            let tmp = tempfile::tempdir().unwrap();
            let cache = Arc::new(MemoryCache::default());
            let provider =
                FakeProvider::new(&["5.1.2"], "6.0.0", cache.clone(), tmp.path()).failing_latest(3);

            let started = tokio::time::Instant::now();
            let result = installer(cache.clone())
                .install_with(&provider, &request(sentinel))
                .await
                .unwrap();

            assert_eq!(result.version, "6.0.0");
            assert!(!result.cache_hit);
            assert_eq!(provider.latest_calls.load(Ordering::SeqCst), 4);
            assert_eq!(provider.list_calls.load(Ordering::SeqCst), 0);
            assert_eq!(provider.downloaded_versions(), ["6.0.0"]);
            // 2s + 4s + 8s of backoff between the four attempts.
            assert!(started.elapsed() >= Duration::from_secs(14));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_latest_release_failure_exhausts_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let provider = FakeProvider::new(&["5.1.2"], "6.0.0", cache.clone(), tmp.path())
            .failing_latest(u32::MAX);

        let result = installer(cache.clone())
            .install_with(&provider, &request("release"))
            .await;

        match result {
            Err(Error::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 5);
                assert!(matches!(*source, Error::Io(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(provider.latest_calls.load(Ordering::SeqCst), 5);
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.lookups.load(Ordering::SeqCst), 0);
        assert!(provider.downloaded_versions().is_empty());
    }

    #[tokio::test]
    async fn custom_retry_policy_bounds_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let provider = FakeProvider::new(&["6.0.0"], "6.0.0", cache.clone(), tmp.path())
            .failing_listing(u32::MAX);

        let result = installer(cache.clone())
            .set_retry_policy(RetryPolicy::new(2, Duration::from_millis(1)))
            .install_with(&provider, &request("^6"))
            .await;

        assert!(matches!(result, Err(Error::RetryExhausted { attempts: 2, .. })));
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unavailable_version_fails_without_retry() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let provider = FakeProvider::new(&["4.4.1", "6.0.0"], "6.0.0", cache.clone(), tmp.path());

        let result = installer(cache.clone())
            .install_with(&provider, &request("^7"))
            .await;

        match result {
            Err(Error::VersionNotAvailable { constraint, highest }) => {
                assert_eq!(constraint, "^7");
                assert_eq!(highest.as_deref(), Some("6.0.0"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn download_errors_pass_through_unwrapped() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let mut provider = FakeProvider::new(&["6.0.0"], "6.0.0", cache.clone(), tmp.path());
        provider.fail_download = true;

        let result = installer(cache.clone())
            .install_with(&provider, &request("6.0.0"))
            .await;

        assert!(matches!(result, Err(Error::HttpStatus { .. })));
        assert_eq!(provider.downloaded_versions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_backoff() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::default());
        let provider = FakeProvider::new(&["6.0.0"], "6.0.0", cache.clone(), tmp.path())
            .failing_listing(u32::MAX);

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let result = installer(cache.clone())
            .set_cancellation_token(token)
            .install_with(&provider, &request("^6"))
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        // First attempt, then 2s backoff, second attempt, then cancelled during 4s backoff.
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsupported_platform_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let result = Installer::new()
            .no_progress()
            .set_platform("plan9")
            .set_tool_cache_dir(tmp.path())
            .install(request("release"))
            .await;

        assert!(matches!(
            result,
            Err(Error::UnsupportedPlatform { platform }) if platform == "plan9"
        ));
    }

    // ──────────────────────────────────────────────────────────────────────
    // Network
    // ──────────────────────────────────────────────────────────────────────

    #[tokio::test]
    #[ignore = "requires network access and downloads large files"]
    async fn test_install_latest_release() {
        let tmp = tempfile::tempdir().unwrap();
        let installer = Installer::new().set_tool_cache_dir(tmp.path());

        let first = installer.install(InstallRequest::new("release")).await;
        assert!(first.is_ok(), "error installing ffmpeg: {:?}", first);
        let first = first.unwrap();
        assert!(first.path.exists());

        let second = installer.install(InstallRequest::new("release")).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.version, first.version);
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_list_host_releases() {
        let request = InstallRequest::new("*");
        let ctx = setup_ffmpeg::ProviderContext {
            downloader: setup_ffmpeg::Downloader::new(),
            cache: Arc::new(DirToolCache::from_env()),
        };
        let provider = setup_ffmpeg::select_provider(std::env::consts::OS, &request, ctx).unwrap();
        let releases = provider.available_releases().await.unwrap();
        assert!(!releases.is_empty());
        let picked = setup_ffmpeg::resolve("*", &releases).unwrap();
        assert!(setup_ffmpeg::resolve::is_explicit_version(&picked.version));
    }
}
