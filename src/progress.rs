use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Callback type for reporting download progress.
/// Arguments: source URL, bytes downloaded, total bytes, MiB/s, is_complete
pub type ProgressFn = Arc<dyn Fn(&str, u64, u64, f64, bool) + Send + Sync>;

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Progress reporter for CI logs: one `info` line per finished download.
pub fn default_progress_fn() -> ProgressFn {
    Arc::new(|src: &str, current: u64, total: u64, mib_per_sec: f64, complete: bool| {
        if complete {
            info!(
                "Downloaded {} ({:.1} MiB of {:.1} MiB, {:.2} MiB/s)",
                src,
                mib(current),
                mib(total),
                mib_per_sec
            );
        }
    })
}

/// Interactive progress bar, one bar per download.
pub fn bar_progress_fn() -> ProgressFn {
    let current_bar: Mutex<Option<ProgressBar>> = Mutex::new(None);
    Arc::new(move |src: &str, current: u64, total: u64, _mib_per_sec: f64, complete: bool| {
        let Ok(mut slot) = current_bar.lock() else {
            return;
        };
        let bar = slot.get_or_insert_with(|| {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec})",
            ) {
                bar.set_style(style.progress_chars("=> "));
            }
            bar.set_message(src.rsplit('/').next().unwrap_or(src).to_owned());
            bar
        });
        if total > 0 {
            bar.set_length(total);
        }
        bar.set_position(current);
        if complete {
            bar.finish();
            *slot = None;
        }
    })
}
