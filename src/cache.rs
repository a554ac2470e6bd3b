//! On-disk tool cache with the GitHub Actions runner layout.
//!
//! Builds live in `<root>/<tool>/<version>/<arch>/`. A sibling
//! `<arch>.complete` marker is written once the directory is fully
//! populated; directories without a readable marker are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::resolve::{parse_version, VersionRange};

/// A build found in the tool cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTool {
    /// Concrete version of the cached build.
    pub version: String,
    pub path: PathBuf,
}

/// Persistent store of installed builds keyed by tool, version and architecture.
pub trait ToolCache: Send + Sync {
    /// Look up a build. `version` may be a concrete version or a range, in
    /// which case the highest cached version satisfying it is returned.
    fn find(&self, tool: &str, version: &str, arch: &str) -> Option<CachedTool>;

    /// Move the extracted build at `source` into the cache and return its new location.
    fn cache_dir(&self, source: &Path, tool: &str, version: &str, arch: &str) -> Result<PathBuf>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletionMarker {
    version: String,
    arch: String,
}

/// Directory-backed [`ToolCache`].
#[derive(Debug, Clone)]
pub struct DirToolCache {
    root: PathBuf,
}

impl DirToolCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted at `RUNNER_TOOL_CACHE`, falling back to a temp directory.
    pub fn from_env() -> Self {
        let root = std::env::var_os("RUNNER_TOOL_CACHE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("setup-ffmpeg-cache"));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_dir(&self, tool: &str, version: &str) -> PathBuf {
        self.root.join(tool).join(version)
    }

    fn marker_path(&self, tool: &str, version: &str, arch: &str) -> PathBuf {
        self.version_dir(tool, version).join(format!("{arch}.complete"))
    }

    fn read_marker(&self, tool: &str, version: &str, arch: &str) -> Option<CompletionMarker> {
        let path = self.marker_path(tool, version, arch);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CompletionMarker>(&raw) {
            Ok(marker) if marker.arch == arch => Some(marker),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable cache marker");
                None
            }
        }
    }

    fn find_exact(&self, tool: &str, version: &str, arch: &str) -> Option<CachedTool> {
        let marker = self.read_marker(tool, version, arch)?;
        let path = self.version_dir(tool, version).join(arch);
        path.is_dir().then(|| CachedTool {
            version: marker.version,
            path,
        })
    }

    /// Every cached version of `tool` that is complete for `arch`.
    pub fn versions(&self, tool: &str, arch: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.root.join(tool)) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|version| self.read_marker(tool, version, arch).is_some())
            .collect()
    }
}

impl ToolCache for DirToolCache {
    fn find(&self, tool: &str, version: &str, arch: &str) -> Option<CachedTool> {
        if let Some(hit) = self.find_exact(tool, version, arch) {
            return Some(hit);
        }

        let range = VersionRange::parse(version).ok()?;
        let best: Option<(Version, String)> = self
            .versions(tool, arch)
            .into_iter()
            .filter_map(|v| parse_version(&v).map(|parsed| (parsed, v)))
            .filter(|(parsed, _)| range.matches(parsed))
            .max_by(|(a, _), (b, _)| a.cmp(b));
        let (_, dir_name) = best?;
        self.find_exact(tool, &dir_name, arch)
    }

    fn cache_dir(&self, source: &Path, tool: &str, version: &str, arch: &str) -> Result<PathBuf> {
        let dest = self.version_dir(tool, version).join(arch);
        let marker = self.marker_path(tool, version, arch);

        if marker.exists() {
            fs::remove_file(&marker)?;
        }
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        fs::create_dir_all(self.version_dir(tool, version))?;

        // Rename fails across filesystems; fall back to copying.
        if fs::rename(source, &dest).is_err() {
            copy_dir_all(source, &dest)?;
            fs::remove_dir_all(source)?;
        }

        let json = serde_json::to_string(&CompletionMarker {
            version: version.to_owned(),
            arch: arch.to_owned(),
        })?;
        fs::write(&marker, json)?;

        debug!(dest = %dest.display(), "Cached build");
        Ok(dest)
    }
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
