//! Warm-up statistics types.

use std::time::{Duration, Instant};

/// Outcome of one warm-up pass over the media manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmUpSummary {
    /// Assets fetched and stored during this pass.
    pub assets_cached: usize,
    /// Assets that were already in the media cache.
    pub assets_skipped: usize,
    /// Assets whose fetch or store failed.
    pub assets_failed: usize,
    /// Bytes stored during this pass.
    pub total_bytes: u64,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

impl Default for WarmUpSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmUpSummary {
    /// Creates an empty summary.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            assets_cached: 0,
            assets_skipped: 0,
            assets_failed: 0,
            total_bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Number of assets the pass visited.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.assets_cached + self.assets_skipped + self.assets_failed
    }

    /// Returns the average fetch speed in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Result of warming a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Fetched and stored; carries the body size.
    Cached(u64),
    /// Already present in the media cache.
    Skipped,
    Failed,
}

/// Accumulates a [`WarmUpSummary`] while a pass runs.
pub struct WarmUpSummaryBuilder {
    summary: WarmUpSummary,
    start_time: Instant,
}

impl Default for WarmUpSummaryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmUpSummaryBuilder {
    /// Starts timing a new pass.
    #[must_use]
    pub fn new() -> Self {
        Self {
            summary: WarmUpSummary::new(),
            start_time: Instant::now(),
        }
    }

    /// Records the outcome of one asset.
    pub const fn record(&mut self, outcome: AssetOutcome) {
        match outcome {
            AssetOutcome::Cached(bytes) => {
                self.summary.assets_cached += 1;
                self.summary.total_bytes += bytes;
            }
            AssetOutcome::Skipped => self.summary.assets_skipped += 1,
            AssetOutcome::Failed => self.summary.assets_failed += 1,
        }
    }

    /// Builds the final summary.
    #[must_use]
    pub fn build(self) -> WarmUpSummary {
        WarmUpSummary {
            elapsed: self.start_time.elapsed(),
            ..self.summary
        }
    }
}
