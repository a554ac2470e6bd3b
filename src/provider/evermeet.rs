//! macOS builds from evermeet.cx. ffmpeg and ffprobe ship as separate zips.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{file_name, ProviderContext, ReleaseProvider, Staging};
use crate::error::{Error, Result};
use crate::release::{
    normalize_version, InstallRequest, InstalledTool, LinkingType, ReleaseDescriptor,
};

const NAME: &str = "evermeet.cx";
const INFO_URL: &str = "https://evermeet.cx/ffmpeg/info/ffmpeg";
const INDEX_URL: &str = "https://evermeet.cx/pub/ffmpeg/";

#[derive(Debug, Deserialize)]
struct BuildInfo {
    version: String,
    download: BuildDownloads,
}

#[derive(Debug, Deserialize)]
struct BuildDownloads {
    zip: BuildArchive,
}

#[derive(Debug, Deserialize)]
struct BuildArchive {
    url: String,
}

fn index_versions(index: &str) -> Result<Vec<String>> {
    let re = Regex::new(r#"href="ffmpeg-(\d+\.\d+(?:\.\d+)?)\.zip""#)
        .map_err(|e| Error::malformed(NAME, e.to_string()))?;
    let mut versions: Vec<String> = Vec::new();
    for caps in re.captures_iter(index) {
        let version = caps[1].to_owned();
        if !versions.contains(&version) {
            versions.push(version);
        }
    }
    Ok(versions)
}

/// The ffprobe archive published next to an ffmpeg archive.
fn ffprobe_url(ffmpeg_url: &str) -> String {
    let name = file_name(ffmpeg_url);
    let dir = &ffmpeg_url[..ffmpeg_url.len() - name.len()];
    let dir = dir.replace("/pub/ffmpeg/", "/pub/ffprobe/");
    let name = name.replacen("ffmpeg", "ffprobe", 1);
    format!("{dir}{name}")
}

/// Provider for `darwin`.
pub struct EvermeetCxProvider {
    options: InstallRequest,
    ctx: ProviderContext,
}

impl EvermeetCxProvider {
    pub fn new(options: InstallRequest, ctx: ProviderContext) -> Result<Self> {
        if options.linking_type != LinkingType::Static {
            return Err(Error::UnsupportedLinkingType {
                provider: NAME,
                linking: options.linking_type.to_string(),
            });
        }
        match options.architecture.as_str() {
            "x64" => {}
            "arm64" => warn!("evermeet.cx only publishes x64 builds; they run under Rosetta 2"),
            other => {
                return Err(Error::UnsupportedArchitecture {
                    provider: NAME,
                    arch: other.to_owned(),
                })
            }
        }
        Ok(Self { options, ctx })
    }
}

#[async_trait]
impl ReleaseProvider for EvermeetCxProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn available_releases(&self) -> Result<Vec<ReleaseDescriptor>> {
        let index = self.ctx.downloader.get_text(INDEX_URL).await?;
        let releases: Vec<ReleaseDescriptor> = index_versions(&index)?
            .into_iter()
            .filter_map(|raw| {
                let version = normalize_version(&raw)?;
                let url = format!("{INDEX_URL}ffmpeg-{raw}.zip");
                Some(ReleaseDescriptor::new(version, vec![url]))
            })
            .collect();
        debug!(count = releases.len(), "Listed evermeet.cx releases");
        Ok(releases)
    }

    async fn latest_release(&self) -> Result<ReleaseDescriptor> {
        let git = self.options.wants_git_build();
        let kind = if git { "snapshot" } else { "release" };
        let info: BuildInfo = self
            .ctx
            .downloader
            .get_json(&format!("{INFO_URL}/{kind}"))
            .await?;
        let urls = vec![info.download.zip.url];
        if git {
            return Ok(ReleaseDescriptor::new(info.version, urls).git_build());
        }
        let version = normalize_version(&info.version).ok_or_else(|| {
            Error::malformed(NAME, format!("unparseable release version {}", info.version))
        })?;
        Ok(ReleaseDescriptor::new(version, urls))
    }

    async fn download_tool(&self, release: &ReleaseDescriptor) -> Result<InstalledTool> {
        info!(version = %release.version, "Downloading evermeet.cx build");
        let staging = Staging::new(&self.options, &release.version)?;
        staging
            .fetch(
                &self.ctx.downloader,
                &self.options,
                &release.download_urls,
                release.checksum_urls.as_deref(),
                0,
            )
            .await?;

        let ffprobe_urls: Vec<String> = release
            .download_urls
            .iter()
            .map(|u| ffprobe_url(u))
            .collect();
        staging
            .fetch(&self.ctx.downloader, &self.options, &ffprobe_urls, None, 0)
            .await?;

        let path = staging.commit(self.ctx.cache.as_ref(), &self.options, &release.version)?;
        Ok(InstalledTool {
            version: release.version.clone(),
            path,
        })
    }
}
