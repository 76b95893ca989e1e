//! Online statistics helpers for the time-sync engine: an RTT-floor
//! sliding window and Welford's online mean/variance, with EMA smoothing
//! and std-deviation confidence buckets.

use std::collections::VecDeque;

use crate::protocol::constants::RTT_FLOOR_WINDOW;

/// Sliding window over the last N burst winners' RTTs, used to detect
/// whether a burst ran during an unusually congested period.
pub struct RttFloorEstimator {
    window: VecDeque<i64>,
}

impl Default for RttFloorEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttFloorEstimator {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(RTT_FLOOR_WINDOW),
        }
    }

    /// Records a burst winner's RTT.
    pub fn push(&mut self, rtt_us: i64) {
        if self.window.len() == RTT_FLOOR_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(rtt_us);
    }

    /// Current floor: the minimum RTT seen across the window, or
    /// `i64::MAX` before any samples are recorded (so the first burst is
    /// never rejected for exceeding a floor that doesn't exist yet).
    pub fn floor(&self) -> i64 {
        self.window.iter().copied().min().unwrap_or(i64::MAX)
    }
}

/// Welford's online algorithm for mean/variance of a measurement stream
/// (here: raw offset samples), avoiding numerical issues from naive
/// two-pass variance on a long-running stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct WelfordStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl WelfordStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Buckets the current standard deviation into a coarse confidence
    /// score for diagnostics, not used by any scheduling decision.
    pub fn confidence(&self) -> Confidence {
        if self.count < 2 {
            return Confidence::Unknown;
        }
        let sd = self.std_dev();
        if sd < 500.0 {
            Confidence::High
        } else if sd < 2_000.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Coarse confidence bucket for the current offset estimate, surfaced for
/// logging/diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Unknown,
    Low,
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_tracks_minimum_over_window() {
        let mut est = RttFloorEstimator::new();
        for rtt in [5_000, 3_000, 4_000, 9_000] {
            est.push(rtt);
        }
        assert_eq!(est.floor(), 3_000);
    }

    #[test]
    fn floor_window_evicts_oldest() {
        let mut est = RttFloorEstimator::new();
        est.push(1_000);
        for _ in 0..RTT_FLOOR_WINDOW {
            est.push(9_000);
        }
        // The original low sample has been evicted.
        assert_eq!(est.floor(), 9_000);
    }

    #[test]
    fn welford_matches_naive_variance() {
        let values = [10.0, 12.0, 9.0, 11.0, 10.5];
        let mut stats = WelfordStats::new();
        for v in values {
            stats.push(v);
        }
        let mean: f64 = values.iter().sum::<f64>() / values.len() as f64;
        let naive_var: f64 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (values.len() - 1) as f64;
        assert!((stats.mean() - mean).abs() < 1e-9);
        assert!((stats.variance() - naive_var).abs() < 1e-9);
    }

    #[test]
    fn confidence_buckets_by_std_dev() {
        let mut tight = WelfordStats::new();
        for v in [100.0, 100.1, 99.9, 100.05] {
            tight.push(v);
        }
        assert_eq!(tight.confidence(), Confidence::High);

        let mut loose = WelfordStats::new();
        for v in [100.0, 5_000.0, -4_000.0, 6_000.0] {
            loose.push(v);
        }
        assert_eq!(loose.confidence(), Confidence::Low);
    }
}
