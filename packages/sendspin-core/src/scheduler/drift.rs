//! Adaptive-threshold drift correction: decides whether a measured
//! predicted/observed server-time error should be held, or corrected by
//! inserting/dropping samples.

use crate::protocol::constants::MAX_CORRECTION_SAMPLES_PER_TICK;
use crate::timesync::WelfordStats;

/// Action to take in response to a drift measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Hold,
    Insert(u32),
    Drop(u32),
}

/// One drift-correction measurement, emitted as telemetry regardless of
/// which action was taken (including `Hold`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SyncCorrectionEvent {
    pub client_us: i64,
    pub predicted_server_us: i64,
    pub dac_observed_server_us: i64,
    pub error_us: i64,
    pub action: SyncAction,
    pub adaptive_threshold_us: i64,
}

impl serde::Serialize for SyncAction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        match self {
            SyncAction::Hold => serializer.serialize_str("hold"),
            SyncAction::Insert(n) => {
                let mut s = serializer.serialize_struct("SyncAction", 1)?;
                s.serialize_field("insert", n)?;
                s.end()
            }
            SyncAction::Drop(n) => {
                let mut s = serializer.serialize_struct("SyncAction", 1)?;
                s.serialize_field("drop", n)?;
                s.end()
            }
        }
    }
}

/// Minimum threshold floor (µs), so a perfectly quiet error history
/// doesn't make the scheduler correct on sub-sample noise.
const MIN_THRESHOLD_US: i64 = 2_000;

/// Maximum threshold ceiling (µs), so a badly behaved history doesn't
/// suppress correction indefinitely.
const MAX_THRESHOLD_US: i64 = 40_000;

/// Tracks recent correction error magnitude to grow/shrink the threshold
/// used to decide Hold vs Insert/Drop.
pub struct AdaptiveThreshold {
    stats: WelfordStats,
}

impl Default for AdaptiveThreshold {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveThreshold {
    pub fn new() -> Self {
        Self {
            stats: WelfordStats::new(),
        }
    }

    /// Current threshold in microseconds: three standard deviations of
    /// recent error, clamped to `[MIN_THRESHOLD_US, MAX_THRESHOLD_US]`.
    pub fn threshold_us(&self) -> i64 {
        if self.stats.count() < 4 {
            return MIN_THRESHOLD_US;
        }
        let raw = (self.stats.std_dev() * 3.0) as i64;
        raw.clamp(MIN_THRESHOLD_US, MAX_THRESHOLD_US)
    }

    /// Records a new error sample and decides the action to take.
    pub fn evaluate(
        &mut self,
        client_us: i64,
        predicted_server_us: i64,
        dac_observed_server_us: i64,
        sample_rate_hz: u32,
    ) -> SyncCorrectionEvent {
        let error_us = predicted_server_us - dac_observed_server_us;
        let threshold = self.threshold_us();
        self.stats.push(error_us as f64);

        let action = if error_us.abs() <= threshold {
            SyncAction::Hold
        } else {
            let n = (error_us.unsigned_abs() as f64 * sample_rate_hz as f64 / 1_000_000.0).round()
                as u32;
            let n = n.min(MAX_CORRECTION_SAMPLES_PER_TICK).max(1);
            if error_us > 0 {
                // Predicted is ahead of what's actually been played: output
                // is running behind, catch up by inserting samples.
                SyncAction::Insert(n)
            } else {
                SyncAction::Drop(n)
            }
        };

        SyncCorrectionEvent {
            client_us,
            predicted_server_us,
            dac_observed_server_us,
            error_us,
            action,
            adaptive_threshold_us: threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_error_holds() {
        let mut threshold = AdaptiveThreshold::new();
        let event = threshold.evaluate(0, 1_000_000, 1_000_500, 48_000);
        assert_eq!(event.action, SyncAction::Hold);
    }

    #[test]
    fn large_positive_error_inserts() {
        let mut threshold = AdaptiveThreshold::new();
        let event = threshold.evaluate(0, 1_100_000, 1_000_000, 48_000);
        match event.action {
            SyncAction::Insert(n) => assert!(n > 0),
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn large_negative_error_drops() {
        let mut threshold = AdaptiveThreshold::new();
        let event = threshold.evaluate(0, 1_000_000, 1_100_000, 48_000);
        match event.action {
            SyncAction::Drop(n) => assert!(n > 0),
            other => panic!("expected Drop, got {other:?}"),
        }
    }

    #[test]
    fn correction_magnitude_is_capped() {
        let mut threshold = AdaptiveThreshold::new();
        let event = threshold.evaluate(0, 10_000_000, 1_000_000, 48_000);
        match event.action {
            SyncAction::Insert(n) => assert!(n <= MAX_CORRECTION_SAMPLES_PER_TICK),
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn threshold_grows_with_noisy_history() {
        let mut threshold = AdaptiveThreshold::new();
        for i in 0..10 {
            let noisy_error = if i % 2 == 0 { 15_000 } else { -15_000 };
            threshold.evaluate(0, 1_000_000 + noisy_error, 1_000_000, 48_000);
        }
        assert!(threshold.threshold_us() > MIN_THRESHOLD_US);
    }
}
