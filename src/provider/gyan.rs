//! Windows builds published by gyan.dev as GitHub releases.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ensure_dir, ProviderContext, ReleaseProvider, Staging};
use crate::error::{Error, Result};
use crate::release::{
    normalize_version, InstallRequest, InstalledTool, LinkingType, ReleaseDescriptor,
};

const NAME: &str = "gyan.dev";
const RELEASES_URL: &str = "https://api.github.com/repos/GyanD/codexffmpeg/releases?per_page=100";
const LATEST_URL: &str = "https://api.github.com/repos/GyanD/codexffmpeg/releases/latest";

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
}

fn is_git_tag(tag: &str) -> bool {
    tag.contains("-git-")
}

fn asset_name(tag: &str, linking: LinkingType) -> String {
    match linking {
        LinkingType::Static => format!("ffmpeg-{tag}-full_build.zip"),
        LinkingType::Shared => format!("ffmpeg-{tag}-full_build-shared.zip"),
    }
}

/// Turn one GitHub release into a descriptor, if it carries the wanted asset.
fn to_descriptor(release: &GitHubRelease, linking: LinkingType) -> Option<ReleaseDescriptor> {
    let wanted = asset_name(&release.tag_name, linking);
    let asset = release.assets.iter().find(|a| a.name == wanted)?;
    let urls = vec![asset.browser_download_url.clone()];
    if is_git_tag(&release.tag_name) {
        Some(ReleaseDescriptor::new(release.tag_name.clone(), urls).git_build())
    } else {
        let version = normalize_version(&release.tag_name)?;
        Some(ReleaseDescriptor::new(version, urls))
    }
}

/// Provider for `win32`, backed by the `GyanD/codexffmpeg` repository.
pub struct GyanProvider {
    options: InstallRequest,
    ctx: ProviderContext,
}

impl GyanProvider {
    pub fn new(options: InstallRequest, ctx: ProviderContext) -> Result<Self> {
        if options.architecture != "x64" {
            return Err(Error::UnsupportedArchitecture {
                provider: NAME,
                arch: options.architecture,
            });
        }
        Ok(Self { options, ctx })
    }

    async fn releases(&self) -> Result<Vec<GitHubRelease>> {
        self.ctx
            .downloader
            .get_github_json(RELEASES_URL, self.options.auth_token.as_deref())
            .await
    }
}

#[async_trait]
impl ReleaseProvider for GyanProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn available_releases(&self) -> Result<Vec<ReleaseDescriptor>> {
        let releases: Vec<ReleaseDescriptor> = self
            .releases()
            .await?
            .iter()
            .filter(|r| !is_git_tag(&r.tag_name))
            .filter_map(|r| to_descriptor(r, self.options.linking_type))
            .collect();
        debug!(count = releases.len(), "Listed gyan.dev releases");
        Ok(releases)
    }

    async fn latest_release(&self) -> Result<ReleaseDescriptor> {
        if self.options.wants_git_build() {
            // Listing is newest first.
            return self
                .releases()
                .await?
                .iter()
                .filter(|r| is_git_tag(&r.tag_name))
                .find_map(|r| to_descriptor(r, self.options.linking_type))
                .ok_or_else(|| Error::malformed(NAME, "no git build with a matching asset"));
        }

        let latest: GitHubRelease = self
            .ctx
            .downloader
            .get_github_json(LATEST_URL, self.options.auth_token.as_deref())
            .await?;
        to_descriptor(&latest, self.options.linking_type).ok_or_else(|| {
            Error::malformed(
                NAME,
                format!("release {} has no {} asset", latest.tag_name, self.options.linking_type),
            )
        })
    }

    async fn download_tool(&self, release: &ReleaseDescriptor) -> Result<InstalledTool> {
        info!(version = %release.version, "Downloading gyan.dev build");
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
        let dir = staging.commit(self.ctx.cache.as_ref(), &self.options, &release.version)?;
        let path = dir.join("bin");
        ensure_dir(&path)?;
        Ok(InstalledTool {
            version: release.version.clone(),
            path,
        })
    }
}
