//! # setup-ffmpeg
//!
//! Resolve, download and cache a platform-specific ffmpeg build on a CI
//! runner, with a chainable, builder-style API.
//!
//! A request names either a semver range (`6.1.1`, `^6`, `>=5 <7`) or one
//! of the sentinels `release` / `git`. The installer picks the release
//! provider for the running platform, resolves the request to one concrete
//! build, and returns the cached copy when one exists. Release lookups are
//! retried with exponential backoff.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use setup_ffmpeg::{InstallRequest, Installer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let result = Installer::new()
//!         .install(InstallRequest::new("^6").architecture("x64"))
//!         .await
//!         .unwrap();
//!     assert!(result.path.exists());
//! }
//! ```

pub mod api;
pub mod cache;
pub mod downloader;
pub mod error;
pub mod progress;
pub mod provider;
pub mod release;
pub mod resolve;
pub mod retry;

pub use api::Installer;
pub use cache::{CachedTool, DirToolCache, ToolCache};
pub use downloader::Downloader;
pub use error::{Error, Result};
pub use progress::{bar_progress_fn, default_progress_fn, ProgressFn};
pub use provider::{select_provider, Platform, ProviderContext, ReleaseProvider};
pub use release::{InstallRequest, InstallResult, InstalledTool, LinkingType, ReleaseDescriptor};
pub use resolve::{resolve, VersionRange};
pub use retry::{with_retry, RetryPolicy};
