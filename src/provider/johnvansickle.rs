//! Static Linux builds from johnvansickle.com.

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::{ProviderContext, ReleaseProvider, Staging};
use crate::error::{Error, Result};
use crate::release::{
    normalize_version, InstallRequest, InstalledTool, LinkingType, ReleaseDescriptor,
};

const NAME: &str = "johnvansickle.com";
const BASE_URL: &str = "https://johnvansickle.com/ffmpeg";

/// Map a Node-style architecture to the name used in archive file names.
fn build_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "x64" => Some("amd64"),
        "ia32" => Some("i686"),
        "arm64" => Some("arm64"),
        "arm" => Some("armhf"),
        _ => None,
    }
}

/// Value of the `version:` line of a build readme.
fn readme_version(readme: &str) -> Result<String> {
    let re = Regex::new(r"(?m)^\s*version:\s*(\S+)")
        .map_err(|e| Error::malformed(NAME, e.to_string()))?;
    re.captures(readme)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
        .ok_or_else(|| Error::malformed(NAME, "readme has no version line"))
}

/// Raw versions linked from the `old-releases/` directory index, in page order.
fn old_release_versions(index: &str, arch: &str) -> Result<Vec<String>> {
    let pattern = format!(
        r#"href="ffmpeg-(\d+\.\d+(?:\.\d+)?)-{}-static\.tar\.xz""#,
        regex::escape(arch)
    );
    let re = Regex::new(&pattern).map_err(|e| Error::malformed(NAME, e.to_string()))?;
    let mut versions: Vec<String> = Vec::new();
    for caps in re.captures_iter(index) {
        let version = caps[1].to_owned();
        if !versions.contains(&version) {
            versions.push(version);
        }
    }
    Ok(versions)
}

fn with_md5(urls: &[String]) -> Vec<String> {
    urls.iter().map(|u| format!("{u}.md5")).collect()
}

fn old_release_url(raw_version: &str, arch: &str) -> String {
    format!("{BASE_URL}/old-releases/ffmpeg-{raw_version}-{arch}-static.tar.xz")
}

/// Provider for `linux`.
pub struct JohnVanSickleProvider {
    options: InstallRequest,
    arch: &'static str,
    ctx: ProviderContext,
}

impl JohnVanSickleProvider {
    pub fn new(options: InstallRequest, ctx: ProviderContext) -> Result<Self> {
        if options.linking_type != LinkingType::Static {
            return Err(Error::UnsupportedLinkingType {
                provider: NAME,
                linking: options.linking_type.to_string(),
            });
        }
        let arch = build_arch(&options.architecture).ok_or_else(|| Error::UnsupportedArchitecture {
            provider: NAME,
            arch: options.architecture.clone(),
        })?;
        Ok(Self { options, arch, ctx })
    }

    async fn current_release(&self) -> Result<ReleaseDescriptor> {
        let readme = self
            .ctx
            .downloader
            .get_text(&format!("{BASE_URL}/release-readme.txt"))
            .await?;
        let raw = readme_version(&readme)?;
        let version = normalize_version(&raw)
            .ok_or_else(|| Error::malformed(NAME, format!("unparseable release version {raw}")))?;
        let urls = vec![
            format!("{BASE_URL}/releases/ffmpeg-release-{}-static.tar.xz", self.arch),
            old_release_url(&raw, self.arch),
        ];
        let checksums = with_md5(&urls);
        Ok(ReleaseDescriptor::new(version, urls).with_checksums(checksums))
    }

    async fn git_build(&self) -> Result<ReleaseDescriptor> {
        let readme = self
            .ctx
            .downloader
            .get_text(&format!("{BASE_URL}/git-readme.txt"))
            .await?;
        let tag = readme_version(&readme)?;
        let urls = vec![format!("{BASE_URL}/builds/ffmpeg-git-{}-static.tar.xz", self.arch)];
        let checksums = with_md5(&urls);
        Ok(ReleaseDescriptor::new(tag, urls)
            .git_build()
            .with_checksums(checksums))
    }
}

#[async_trait]
impl ReleaseProvider for JohnVanSickleProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn available_releases(&self) -> Result<Vec<ReleaseDescriptor>> {
        let mut releases = vec![self.current_release().await?];

        let index = self
            .ctx
            .downloader
            .get_text(&format!("{BASE_URL}/old-releases/"))
            .await?;
        for raw in old_release_versions(&index, self.arch)? {
            let Some(version) = normalize_version(&raw) else {
                continue;
            };
            let urls = vec![old_release_url(&raw, self.arch)];
            let checksums = with_md5(&urls);
            releases.push(ReleaseDescriptor::new(version, urls).with_checksums(checksums));
        }
        debug!(count = releases.len(), "Listed johnvansickle.com releases");
        Ok(releases)
    }

    async fn latest_release(&self) -> Result<ReleaseDescriptor> {
        if self.options.wants_git_build() {
            self.git_build().await
        } else {
            self.current_release().await
        }
    }

    async fn download_tool(&self, release: &ReleaseDescriptor) -> Result<InstalledTool> {
        info!(version = %release.version, arch = self.arch, "Downloading johnvansickle.com build");
        let staging = Staging::new(&self.options, &release.version)?;
        staging
            .fetch(
                &self.ctx.downloader,
                &self.options,
                &release.download_urls,
                release.checksum_urls.as_deref(),
                1,
            )
            .await?;
        let path = staging.commit(self.ctx.cache.as_ref(), &self.options, &release.version)?;
        Ok(InstalledTool {
            version: release.version.clone(),
            path,
        })
    }
}
