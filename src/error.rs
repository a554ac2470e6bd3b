//! Error types for resolving and installing ffmpeg builds.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, downloading, or caching a build.
#[derive(Error, Debug)]
pub enum Error {
    /// The running platform has no release provider.
    #[error("unsupported platform: {platform}")]
    UnsupportedPlatform {
        /// Platform identifier as reported by the host or the caller.
        platform: String,
    },

    /// No listed release satisfies the requested constraint.
    #[error("requested version {constraint} is not available{}", highest_hint(.highest))]
    VersionNotAvailable {
        /// The unsatisfiable constraint.
        constraint: String,
        /// Highest version the provider listed, if any.
        highest: Option<String>,
    },

    /// The requested constraint is not a valid semver range.
    #[error("invalid version range {range:?}: {source}")]
    InvalidVersionRange {
        range: String,
        #[source]
        source: semver::Error,
    },

    /// A retried operation failed on every attempt.
    #[error("failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// The install was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    #[error("{provider} does not provide builds for architecture {arch}")]
    UnsupportedArchitecture { provider: &'static str, arch: String },

    #[error("{provider} does not provide {linking} builds")]
    UnsupportedLinkingType {
        provider: &'static str,
        linking: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Every mirror of a release failed to download.
    #[error("all download urls failed ({}): {source}", .urls.join(", "))]
    AllMirrorsFailed {
        urls: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .file.display())]
    ChecksumMismatch {
        file: PathBuf,
        expected: String,
        actual: String,
    },

    /// A release listing could not be understood.
    #[error("malformed release listing from {source_name}: {message}")]
    MalformedListing {
        source_name: &'static str,
        message: String,
    },

    #[error("unsupported archive format: {}", .file.display())]
    UnsupportedArchive { file: PathBuf },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn highest_hint(highest: &Option<String>) -> String {
    match highest {
        Some(v) => format!(" (highest available: {v})"),
        None => String::new(),
    }
}

impl Error {
    /// Whether this error must be surfaced immediately instead of retried.
    ///
    /// Transport, I/O and parsing failures are transient from the retry
    /// executor's point of view; everything describing a request that can
    /// never succeed is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform { .. }
                | Self::VersionNotAvailable { .. }
                | Self::InvalidVersionRange { .. }
                | Self::UnsupportedArchitecture { .. }
                | Self::UnsupportedLinkingType { .. }
                | Self::Cancelled
        )
    }

    pub(crate) fn malformed(source_name: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedListing {
            source_name,
            message: message.into(),
        }
    }
}
