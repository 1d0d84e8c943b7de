//! # Usage Estimator
//!
//! Time-windowed rolling average of uplink upload usage. Every polling
//! cycle contributes one raw sample; samples older than the window are
//! trimmed from the front before the mean is taken, so a short upload
//! spike only moves the smoothed figure in proportion to its share of
//! the window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// One raw usage observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthSample {
    pub at: Instant,
    pub usage_mbps: f64,
}

/// Rolling-window mean of raw usage samples.
#[derive(Debug, Clone)]
pub struct UsageEstimator {
    window: Duration,
    samples: VecDeque<BandwidthSample>,
}

impl UsageEstimator {
    pub fn new(window: Duration) -> Self {
        UsageEstimator {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Window covering `spike_duration_minutes` minutes.
    pub fn from_minutes(spike_duration_minutes: u64) -> Self {
        Self::new(Duration::from_secs(spike_duration_minutes * 60))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Record `raw_usage_mbps` at `now` and return the smoothed usage.
    ///
    /// Samples must be fed in time order; eviction is a prefix trim.
    pub fn observe(&mut self, raw_usage_mbps: f64, now: Instant) -> f64 {
        self.samples.push_back(BandwidthSample {
            at: now,
            usage_mbps: raw_usage_mbps,
        });

        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(oldest.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        // The sample just pushed has age zero, so the window is never empty here.
        self.mean().unwrap_or(raw_usage_mbps)
    }

    /// Current smoothed usage, `None` before the first sample.
    pub fn current(&self) -> Option<f64> {
        self.mean()
    }

    fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.usage_mbps).sum();
        Some(sum / self.samples.len() as f64)
    }
}
