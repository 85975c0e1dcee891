//! Progress bar and summary reporting for CLI warm-up runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::cache::CacheSummary;
use crate::messages::WorkerMessage;
use crate::stats::WarmUpSummary;

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Formats a byte count as a human-readable string (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Formats a duration as `4.2s` or `1m 05s`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}.{}s", d.subsec_millis() / 100)
    }
}

/// Creates the bar tracking media assets completed.
pub fn make_warm_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress template is valid")
            .progress_chars("━━╌"),
    );
    bar
}

/// Last path segment of a URL, for the progress message.
fn asset_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Drives `bar` from the messages a warm-up pass posts to this page.
/// Returns once the pass reports completion or the channel closes.
pub async fn report_progress(mut rx: UnboundedReceiver<WorkerMessage>, bar: ProgressBar) {
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::CacheProgress {
                url,
                completed,
                total,
            } => {
                bar.set_length(total as u64);
                bar.set_position(completed as u64);
                bar.set_message(asset_name(&url).to_string());
            }
            WorkerMessage::CacheComplete => break,
            WorkerMessage::SyncComplete => {}
        }
    }
}

/// Prints the outcome of a warm-up pass.
pub fn print_summary(summary: &WarmUpSummary) {
    println!("\n{SEPARATOR}");
    println!("Warm-up Summary");
    println!("{SEPARATOR}");
    println!("  Recordings cached:  {}", summary.assets_cached);
    if summary.assets_cached > 0 {
        println!("  Downloaded:         {}", format_bytes(summary.total_bytes));
        println!(
            "  Average speed:      {}/s",
            format_bytes(summary.average_speed())
        );
    }
    if summary.assets_skipped > 0 {
        println!("  Already cached:     {}", summary.assets_skipped);
    }
    if summary.assets_failed > 0 {
        println!("  Failed:             {}", summary.assets_failed);
    }
    println!("  Total time:         {}", format_duration(summary.elapsed));
    println!("{SEPARATOR}");
}

/// Prints one line per cache, marking the ones the current worker keeps.
pub fn print_caches(caches: &[CacheSummary]) {
    if caches.is_empty() {
        println!("No caches.");
        return;
    }
    println!("{SEPARATOR}");
    for cache in caches {
        let marker = if cache.current { "*" } else { " " };
        println!("{marker} {:<40} {:>5} entries", cache.name, cache.entries);
    }
    println!("{SEPARATOR}");
    println!("* current");
}
