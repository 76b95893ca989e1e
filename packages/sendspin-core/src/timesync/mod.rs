//! C3: time-sync engine.
//!
//! Runs burst-of-8 two-way time exchanges against the server, aggregates
//! each burst into zero or more [`OffsetSample`]s, and feeds them to a
//! [`crate::filter::ClockFilter`]. See [`engine::TimeSyncEngine`] for the
//! driving state machine.

mod engine;
mod stats;

pub use engine::{BurstOutcome, TimeSyncEngine, TimeSyncState};
pub use stats::{Confidence, RttFloorEstimator, WelfordStats};

/// One accepted two-way offset measurement, computed from a single probe's
/// four timestamps (t1 = client send, t2 = server receive, t3 = server
/// send, t4 = client receive):
///
/// ```text
/// rtt_us        = (t4 - t1) - (t3 - t2)
/// client_mid_us = t1 + rtt_us / 2
/// raw_offset_us = ((t2 - t1) + (t3 - t4)) / 2
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetSample {
    pub raw_offset_us: f64,
    pub client_mid_us: i64,
    pub rtt_us: i64,
}

impl OffsetSample {
    /// Builds a sample from the four NTP-style exchange timestamps.
    pub fn from_exchange(t1: i64, t2: i64, t3: i64, t4: i64) -> Self {
        let rtt_us = (t4 - t1) - (t3 - t2);
        let client_mid_us = t1 + rtt_us / 2;
        let raw_offset_us = ((t2 - t1) as f64 + (t3 - t4) as f64) / 2.0;
        Self {
            raw_offset_us,
            client_mid_us,
            rtt_us,
        }
    }
}
