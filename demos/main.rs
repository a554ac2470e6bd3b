use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use setup_ffmpeg::{bar_progress_fn, InstallRequest, Installer, LinkingType, RetryPolicy};
use tracing_subscriber::EnvFilter;

/// Install ffmpeg onto a CI runner. Every flag can also be set through the
/// matching GitHub Actions `INPUT_*` variable.
#[derive(Debug, Parser)]
#[command(name = "setup-ffmpeg", version)]
struct Args {
    /// Semver range, or `release` / `git` for the newest build.
    #[arg(long, env = "INPUT_FFMPEG_VERSION", default_value = "release")]
    ffmpeg_version: String,

    /// Target architecture (x64, arm64, ia32, arm).
    #[arg(long, env = "INPUT_ARCHITECTURE")]
    architecture: Option<String>,

    #[arg(long, env = "INPUT_LINKING_TYPE", default_value = "static")]
    linking_type: LinkingType,

    #[arg(long, env = "INPUT_TOOL_CACHE_DIR", default_value = "ffmpeg")]
    tool_cache_dir: String,

    #[arg(long, env = "INPUT_SKIP_INTEGRITY_CHECK", default_value_t = false)]
    skip_integrity_check: bool,

    #[arg(long, env = "INPUT_GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Attempts for release lookups.
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Show an interactive progress bar instead of log lines.
    #[arg(long)]
    progress_bar: bool,
}

/// Append `name=value` lines to a GitHub Actions command file, if present.
fn append_github_file(var: &str, lines: &[String]) -> std::io::Result<()> {
    let Some(path) = std::env::var_os(var) else {
        return Ok(());
    };
    let mut file = std::fs::OpenOptions::new().append(true).create(true).open(path)?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut request = InstallRequest::new(&args.ffmpeg_version)
        .cache_key(&args.tool_cache_dir)
        .skip_integrity_check(args.skip_integrity_check)
        .linking_type(args.linking_type)
        .auth_token(args.github_token.clone());
    if let Some(arch) = &args.architecture {
        request = request.architecture(arch);
    }

    let mut installer = Installer::new()
        .set_retry_policy(RetryPolicy::new(args.max_attempts, Duration::from_millis(1000)));
    if args.progress_bar {
        installer = installer.set_progress(bar_progress_fn());
    }

    let cancel = installer.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match installer.install(request).await {
        Ok(result) => {
            tracing::info!(
                version = %result.version,
                path = %result.path.display(),
                cache_hit = result.cache_hit,
                "ffmpeg is ready"
            );
            let outputs = [
                format!("version={}", result.version),
                format!("path={}", result.path.display()),
                format!("cache-hit={}", result.cache_hit),
            ];
            let bin_dir = [result.path.display().to_string()];
            let written = append_github_file("GITHUB_OUTPUT", &outputs)
                .and_then(|()| append_github_file("GITHUB_PATH", &bin_dir));
            if let Err(e) = written {
                tracing::error!(error = %e, "Could not write GitHub Actions outputs");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("error installing ffmpeg: {e}");
            ExitCode::FAILURE
        }
    }
}
