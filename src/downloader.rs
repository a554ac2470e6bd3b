use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use md5::Md5;
use reqwest::{Client, Proxy, RequestBuilder};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use xz2::read::XzDecoder;

use crate::error::{Error, Result};
use crate::progress::ProgressFn;

/// HTTP plumbing shared by the release providers.
#[derive(Clone)]
pub struct Downloader {
    /// Optional HTTP proxy URL.
    pub proxy: Option<String>,
    /// Optional progress callback.
    pub progress: Option<ProgressFn>,
    /// Per-request timeout for metadata requests.
    pub timeout: Duration,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    /// Create a downloader with default settings.
    pub fn new() -> Self {
        Self {
            proxy: None,
            progress: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Create a downloader with explicit configuration.
    pub fn with_config(proxy: Option<String>, progress: Option<ProgressFn>) -> Self {
        Self {
            proxy,
            progress,
            ..Self::new()
        }
    }

    /// Build an HTTP client, optionally with proxy support.
    fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .connect_timeout(self.timeout)
            .user_agent(concat!("setup-ffmpeg/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy_url) = &self.proxy {
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }
        Ok(builder.build()?)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<reqwest::Response> {
        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(Error::HttpStatus {
                url: url.to_owned(),
                status: resp.status(),
            });
        }
        Ok(resp)
    }

    /// Fetch a URL as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        debug!(%url, "Fetching");
        let client = self.build_client()?;
        let request = client.get(url).timeout(self.timeout);
        Ok(self.send(request, url).await?.text().await?)
    }

    /// Fetch a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(%url, "Fetching JSON");
        let client = self.build_client()?;
        let request = client.get(url).timeout(self.timeout);
        Ok(self.send(request, url).await?.json().await?)
    }

    /// Fetch a GitHub REST API document, authenticated when a token is given.
    pub async fn get_github_json<T: DeserializeOwned>(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<T> {
        debug!(%url, authenticated = token.is_some(), "Fetching GitHub API");
        let client = self.build_client()?;
        let mut request = client
            .get(url)
            .timeout(self.timeout)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Ok(self.send(request, url).await?.json().await?)
    }

    /// Download the first reachable mirror into `dest_dir` and return the file path.
    pub async fn download_first(&self, urls: &[String], dest_dir: &Path) -> Result<PathBuf> {
        let mut last_err = None;
        for url in urls {
            match self.download_file(url, dest_dir).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    warn!(%url, error = %e, "Download failed, trying next mirror");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(Error::AllMirrorsFailed {
                urls: urls.to_vec(),
                source: Box::new(e),
            }),
            None => Err(Error::malformed("release descriptor", "no download urls")),
        }
    }

    /// Stream a file directly into `dest_dir/<filename>`.
    pub async fn download_file(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        let filename = url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("download");
        let dest_path = dest_dir.join(filename);
        std::fs::create_dir_all(dest_dir)?;

        debug!(%url, dest = %dest_path.display(), "Downloading");
        let client = self.build_client()?;
        let resp = self.send(client.get(url), url).await?;

        let total = resp.content_length().unwrap_or(0);
        let mut downloaded: u64 = 0;
        let mut stream = resp.bytes_stream();
        let mut file = File::create(&dest_path)?;
        let start = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk: bytes::Bytes = chunk?;
            downloaded += chunk.len() as u64;
            file.write_all(&chunk)?;
            self.report(url, downloaded, total, start, false);
        }
        file.flush()?;
        self.report(url, downloaded, total, start, true);

        Ok(dest_path)
    }

    fn report(&self, src: &str, downloaded: u64, total: u64, start: Instant, complete: bool) {
        if let Some(progress) = &self.progress {
            let elapsed = start.elapsed().as_secs_f64();
            let mib_per_sec = if elapsed > 0.0 {
                (downloaded as f64) / (1024.0 * 1024.0) / elapsed
            } else {
                0.0
            };
            progress(src, downloaded, total, mib_per_sec, complete);
        }
    }

    /// Compare `file` against the first checksum file that can be fetched.
    ///
    /// The algorithm follows the checksum file extension (`.md5` or
    /// `.sha256`); the expected digest is the first token of the file.
    pub async fn verify_checksum(&self, file: &Path, checksum_urls: &[String]) -> Result<()> {
        let mut last_err = None;
        for url in checksum_urls {
            let body = match self.get_text(url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(%url, error = %e, "Could not fetch checksum");
                    last_err = Some(e);
                    continue;
                }
            };
            let Some(expected) = body.split_whitespace().next() else {
                warn!(%url, "Checksum file is empty");
                last_err = Some(Error::malformed("checksum file", format!("{url} is empty")));
                continue;
            };
            let expected = expected.to_ascii_lowercase();
            let actual = if url.ends_with(".md5") {
                file_digest::<Md5>(file)?
            } else {
                file_digest::<Sha256>(file)?
            };
            if actual != expected {
                return Err(Error::ChecksumMismatch {
                    file: file.to_owned(),
                    expected,
                    actual,
                });
            }
            debug!(file = %file.display(), %url, "Checksum verified");
            return Ok(());
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn file_digest<D: Digest + Write>(path: &Path) -> Result<String> {
    let mut hasher = D::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Extract `archive` into `dest`, dropping the first `strip_components`
/// path components of every entry.
pub fn extract(archive: &Path, dest: &Path, strip_components: usize) -> Result<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    std::fs::create_dir_all(dest)?;

    let file = File::open(archive)?;
    if name.ends_with(".zip") {
        extract_zip(file, dest, strip_components)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar(GzDecoder::new(file), dest, strip_components)
    } else if name.ends_with(".tar.xz") {
        extract_tar(XzDecoder::new(file), dest, strip_components)
    } else {
        Err(Error::UnsupportedArchive {
            file: archive.to_owned(),
        })
    }
}

/// Entry path below `dest` after stripping, or `None` when nothing is left
/// or the remainder could escape `dest` (`..`, root or prefix components).
fn stripped(path: &Path, strip_components: usize) -> Option<PathBuf> {
    let mut rest = PathBuf::new();
    let components = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .skip(strip_components);
    for component in components {
        match component {
            Component::Normal(part) => rest.push(part),
            _ => {
                warn!(entry = %path.display(), "Skipping archive entry outside destination");
                return None;
            }
        }
    }
    (!rest.as_os_str().is_empty()).then_some(rest)
}

fn extract_zip(file: File, dest: &Path, strip_components: usize) -> Result<()> {
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = stripped(&entry.mangled_name(), strip_components) else {
            continue;
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&outpath)?;
        io::copy(&mut entry, &mut out)?;

        // Preserve executable permission on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }
    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path, strip_components: usize) -> Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(relative) = stripped(&path, strip_components) else {
            continue;
        };
        let outpath = dest.join(&relative);

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&outpath)?;
            }
            _ => {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry.unpack(&outpath)?;
            }
        }
    }
    Ok(())
}
