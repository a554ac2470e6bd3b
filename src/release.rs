use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tool name used as the default tool cache key.
pub const DEFAULT_CACHE_KEY: &str = "ffmpeg";

/// How the ffmpeg binaries are linked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkingType {
    #[default]
    Static,
    Shared,
}

impl fmt::Display for LinkingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => f.write_str("static"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

impl FromStr for LinkingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "shared" => Ok(Self::Shared),
            other => Err(format!("unknown linking type: {other}")),
        }
    }
}

/// Options for a single install call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    /// A semver range, or one of the sentinels `git` / `release`.
    pub version: String,
    /// Node-style architecture name (`x64`, `arm64`, `ia32`, `arm`).
    #[serde(default = "host_arch_owned")]
    pub architecture: String,
    /// Tool name under which builds are cached.
    #[serde(default = "default_cache_key")]
    pub cache_key: String,
    #[serde(default)]
    pub skip_integrity_check: bool,
    #[serde(default)]
    pub linking_type: LinkingType,
    /// Token used for authenticated GitHub API requests.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl InstallRequest {
    /// Request `version` for the host architecture with default options.
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_owned(),
            architecture: host_arch().to_owned(),
            cache_key: default_cache_key(),
            skip_integrity_check: false,
            linking_type: LinkingType::default(),
            auth_token: None,
        }
    }

    pub fn architecture(mut self, arch: &str) -> Self {
        self.architecture = arch.to_owned();
        self
    }

    pub fn cache_key(mut self, key: &str) -> Self {
        self.cache_key = key.to_owned();
        self
    }

    pub fn skip_integrity_check(mut self, skip: bool) -> Self {
        self.skip_integrity_check = skip;
        self
    }

    pub fn linking_type(mut self, linking: LinkingType) -> Self {
        self.linking_type = linking;
        self
    }

    pub fn auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Whether the requested version is a "latest build" sentinel.
    pub fn is_latest(&self) -> bool {
        is_latest_sentinel(&self.version)
    }

    /// Whether the git snapshot build was requested.
    pub fn wants_git_build(&self) -> bool {
        self.version.eq_ignore_ascii_case("git")
    }
}

/// Returns true for `git` and `release`, ignoring case.
pub fn is_latest_sentinel(version: &str) -> bool {
    version.eq_ignore_ascii_case("git") || version.eq_ignore_ascii_case("release")
}

/// Node-style name of the host CPU architecture.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        "arm" => "arm",
        other => other,
    }
}

fn host_arch_owned() -> String {
    host_arch().to_owned()
}

fn default_cache_key() -> String {
    DEFAULT_CACHE_KEY.to_owned()
}

/// One discoverable build and where to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Concrete version (semver for releases, the build tag for git builds).
    pub version: String,
    pub is_git_build: Option<bool>,
    /// Mirrors, tried in order.
    pub download_urls: Vec<String>,
    pub checksum_urls: Option<Vec<String>>,
}

impl ReleaseDescriptor {
    pub fn new(version: impl Into<String>, download_urls: Vec<String>) -> Self {
        Self {
            version: version.into(),
            is_git_build: None,
            download_urls,
            checksum_urls: None,
        }
    }

    pub fn git_build(mut self) -> Self {
        self.is_git_build = Some(true);
        self
    }

    pub fn with_checksums(mut self, checksum_urls: Vec<String>) -> Self {
        self.checksum_urls = Some(checksum_urls);
        self
    }
}

/// A build present on disk, as produced by a download or found in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledTool {
    pub version: String,
    pub path: PathBuf,
}

/// Outcome of [`Installer::install`](crate::Installer::install).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub version: String,
    pub path: PathBuf,
    /// True when the build came from the tool cache without network access.
    pub cache_hit: bool,
}

impl InstallResult {
    pub(crate) fn downloaded(tool: InstalledTool) -> Self {
        Self {
            version: tool.version,
            path: tool.path,
            cache_hit: false,
        }
    }
}

/// Normalise a provider version string into `major.minor.patch` form.
///
/// Leading `v`/`n` prefixes are dropped and missing components are filled
/// with zero, so `6.0` becomes `6.0.0`. Returns `None` unless the input starts
/// with at least `major.minor`.
pub fn normalize_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V', 'n']);
    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let mut numbers = Vec::with_capacity(3);
    for part in &parts {
        numbers.push(part.parse::<u64>().ok()?);
    }
    numbers.resize(3, 0);
    let normalized = format!("{}.{}.{}{rest}", numbers[0], numbers[1], numbers[2]);
    semver::Version::parse(&normalized).ok()?;
    Some(normalized)
}
