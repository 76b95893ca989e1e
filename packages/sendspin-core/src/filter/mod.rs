//! C4: clock filter.
//!
//! A two-state (offset, drift) Kalman filter mapping the player's
//! monotonic clock to the server's wall clock. `offset_us` and `drift` are
//! held in atomics so [`ClockFilter::predict_at`] never blocks behind
//! [`ClockFilter::update`]; the covariance matrix, which only `update`
//! touches, lives behind a `parking_lot::Mutex` held for nothing but the
//! predict+update math.
//!
//! Outliers are absorbed by inflating process noise in proportion to the
//! squared normalized innovation rather than by rejecting the
//! measurement outright, so a genuine step change (e.g. the server's
//! clock stepped) is tracked within a few updates instead of being
//! permanently ignored. Drift is never decayed towards zero.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::timesync::OffsetSample;

/// Measurement variance (µs²), used as `R`. Never inflated by outlier
/// handling — it's `Q` that inflates, not `R`.
const BASE_MEASUREMENT_VARIANCE: f64 = 4_000.0 * 4_000.0;

/// Base process noise for the offset state (µs² per second).
const BASE_PROCESS_NOISE_OFFSET: f64 = 50.0;

/// Base process noise for the drift state (per second).
const BASE_PROCESS_NOISE_DRIFT: f64 = 1e-8;

/// Coupling term between offset and drift process noise.
const BASE_PROCESS_NOISE_COUPLING: f64 = 1e-4;

/// Initial covariance: deliberately large so the first measurement is
/// trusted almost completely.
const INITIAL_VARIANCE_OFFSET: f64 = 1.0e12;
const INITIAL_VARIANCE_DRIFT: f64 = 1.0;

/// Caps how far a single outlier can inflate `Q`, so one corrupt sample
/// cannot make the filter swing wildly on the next prediction.
const MAX_INFLATION_FACTOR: f64 = 50.0;

/// A point-in-time snapshot of filter state, useful for telemetry/tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockFilterSnapshot {
    pub offset_us: f64,
    pub drift: f64,
    pub is_ready: bool,
    pub measurement_count: u64,
    pub offset_error_us: f64,
}

/// Two-state Kalman clock filter.
pub struct ClockFilter {
    offset_us_bits: AtomicU64, // f64 bit pattern
    drift_bits: AtomicU64,     // f64 bit pattern
    last_update_client_us: AtomicI64,
    measurement_count: AtomicU64,
    ready: AtomicBool,
    inner: Mutex<FilterCovariance>,
}

struct FilterCovariance {
    /// 2x2 covariance, row-major: [[p00, p01], [p10, p11]].
    p: [[f64; 2]; 2],
}

impl Default for ClockFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockFilter {
    /// Creates a filter with zero offset/drift and wide initial
    /// uncertainty, not yet ready.
    pub fn new() -> Self {
        Self {
            offset_us_bits: AtomicU64::new(0.0f64.to_bits()),
            drift_bits: AtomicU64::new(0.0f64.to_bits()),
            last_update_client_us: AtomicI64::new(0),
            measurement_count: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            inner: Mutex::new(FilterCovariance {
                p: [
                    [INITIAL_VARIANCE_OFFSET, 0.0],
                    [0.0, INITIAL_VARIANCE_DRIFT],
                ],
            }),
        }
    }

    fn load_offset(&self) -> f64 {
        f64::from_bits(self.offset_us_bits.load(Ordering::Acquire))
    }

    fn store_offset(&self, v: f64) {
        self.offset_us_bits.store(v.to_bits(), Ordering::Release);
    }

    fn load_drift(&self) -> f64 {
        f64::from_bits(self.drift_bits.load(Ordering::Acquire))
    }

    fn store_drift(&self, v: f64) {
        self.drift_bits.store(v.to_bits(), Ordering::Release);
    }

    /// Whether the filter has accepted enough measurements to be trusted.
    /// Monotonic: once true, stays true until [`ClockFilter::reset`].
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of measurements accepted since the last reset.
    pub fn measurement_count(&self) -> u64 {
        self.measurement_count.load(Ordering::Acquire)
    }

    /// Predicts the server time corresponding to a given client monotonic
    /// time. Lock-free: reads only the atomic hot fields.
    pub fn predict_at(&self, t_client_us: i64) -> i64 {
        let offset = self.load_offset();
        let drift = self.load_drift();
        let last = self.last_update_client_us.load(Ordering::Acquire);
        let dt = (t_client_us - last) as f64;
        (t_client_us as f64 + offset + drift * dt) as i64
    }

    /// Current offset error estimate (sqrt of the offset variance), or
    /// `f64::INFINITY` if the filter has never been updated.
    pub fn offset_error_us(&self) -> f64 {
        if self.measurement_count() == 0 {
            return f64::INFINITY;
        }
        self.inner.lock().p[0][0].max(0.0).sqrt()
    }

    /// Current drift rate estimate (dimensionless, 1e-6 scale — i.e. ppm
    /// when multiplied by 1e6).
    pub fn drift_rate(&self) -> f64 {
        self.load_drift()
    }

    /// Resets the filter to its initial, not-ready state. The only way
    /// `is_ready()` can go from true back to false.
    pub fn reset(&self) {
        self.store_offset(0.0);
        self.store_drift(0.0);
        self.last_update_client_us.store(0, Ordering::Release);
        self.measurement_count.store(0, Ordering::Release);
        self.ready.store(false, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.p = [
            [INITIAL_VARIANCE_OFFSET, 0.0],
            [0.0, INITIAL_VARIANCE_DRIFT],
        ];
    }

    /// Feeds a new offset sample into the filter: predict to the
    /// sample's timestamp, then apply the measurement update.
    pub fn update(&self, sample: &OffsetSample) {
        let mut inner = self.inner.lock();

        let count = self.measurement_count.load(Ordering::Acquire);
        if count == 0 {
            // Bootstrap: trust the first sample directly, start the clock.
            self.store_offset(sample.raw_offset_us);
            self.store_drift(0.0);
            self.last_update_client_us
                .store(sample.client_mid_us, Ordering::Release);
            self.measurement_count.store(1, Ordering::Release);
            return;
        }

        let last = self.last_update_client_us.load(Ordering::Acquire);
        let dt = (sample.client_mid_us - last) as f64 / 1_000_000.0; // seconds
        let mut offset = self.load_offset();
        let mut drift = self.load_drift();

        // Predict step.
        offset += drift * (sample.client_mid_us - last) as f64;
        let dt = dt.max(0.0);
        let q = [
            [
                BASE_PROCESS_NOISE_OFFSET * dt,
                BASE_PROCESS_NOISE_COUPLING * dt,
            ],
            [
                BASE_PROCESS_NOISE_COUPLING * dt,
                BASE_PROCESS_NOISE_DRIFT * dt,
            ],
        ];
        // P = F P F^T + Q*dt, F = [[1, dt_us], [0, 1]] where dt_us is the
        // elapsed client time in microseconds (offset/drift share that unit).
        let dt_us = (sample.client_mid_us - last) as f64;
        let p = inner.p;
        let f00 = 1.0;
        let f01 = dt_us;
        let fp00 = f00 * p[0][0] + f01 * p[1][0];
        let fp01 = f00 * p[0][1] + f01 * p[1][1];
        let fp10 = p[1][0];
        let fp11 = p[1][1];
        let fpft = [
            [fp00 * f00 + fp01 * f01, fp00 * 0.0 + fp01 * 1.0],
            [fp10 * f00 + fp11 * f01, fp10 * 0.0 + fp11 * 1.0],
        ];

        // Measurement update. S uses the POST-prediction p_pred[0][0],
        // never the stale pre-prediction value — using the stale value
        // would systematically understate S and overweight noisy
        // measurements.
        let innovation = sample.raw_offset_us - offset;

        // Outlier handling: inflate Q (all four elements, symmetrically)
        // in proportion to the squared normalized innovation, rather than
        // rejecting the sample or inflating R. Inflating Q keeps the
        // filter responsive to a genuine step change; inflating R would
        // instead make it trust the new measurement less, which is
        // backwards for a real step.
        let s_nominal = fpft[0][0] + q[0][0] + BASE_MEASUREMENT_VARIANCE;
        let normalized_sq = if s_nominal > 0.0 {
            (innovation * innovation) / s_nominal
        } else {
            0.0
        };
        let inflation = (normalized_sq / 9.0).min(MAX_INFLATION_FACTOR).max(1.0);

        let mut p_pred = fpft;
        p_pred[0][0] += q[0][0] * inflation;
        p_pred[0][1] += q[0][1] * inflation;
        p_pred[1][0] += q[1][0] * inflation;
        p_pred[1][1] += q[1][1] * inflation;

        let s = p_pred[0][0] + BASE_MEASUREMENT_VARIANCE;
        let k0 = p_pred[0][0] / s;
        let k1 = p_pred[1][0] / s;

        offset += k0 * innovation;
        drift += k1 * innovation;

        // Joseph form: P = (I - K H) P (I - K H)^T + K R K^T, H = [1, 0].
        let ikh = [[1.0 - k0, 0.0], [-k1, 1.0]];
        let mut p_new = [[0.0; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                let mut acc = 0.0;
                for k in 0..2 {
                    acc += ikh[i][k] * p_pred[k][j];
                }
                p_new[i][j] = acc;
            }
        }
        let mut p_final = [[0.0; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                let mut acc = 0.0;
                for k in 0..2 {
                    let ikh_t = ikh[j][k]; // (I-KH)^T element
                    acc += p_new[i][k] * ikh_t;
                }
                p_final[i][j] = acc;
            }
        }
        p_final[0][0] += k0 * BASE_MEASUREMENT_VARIANCE * k0;
        p_final[0][1] += k0 * BASE_MEASUREMENT_VARIANCE * k1;
        p_final[1][0] += k1 * BASE_MEASUREMENT_VARIANCE * k0;
        p_final[1][1] += k1 * BASE_MEASUREMENT_VARIANCE * k1;

        inner.p = p_final;
        drop(inner);

        self.store_offset(offset);
        self.store_drift(drift);
        self.last_update_client_us
            .store(sample.client_mid_us, Ordering::Release);
        let new_count = count + 1;
        self.measurement_count.store(new_count, Ordering::Release);
        if new_count >= 2 {
            self.ready.store(true, Ordering::Release);
        }
    }

    /// Captures a consistent snapshot of the filter's public state.
    pub fn snapshot(&self) -> ClockFilterSnapshot {
        ClockFilterSnapshot {
            offset_us: self.load_offset(),
            drift: self.load_drift(),
            is_ready: self.is_ready(),
            measurement_count: self.measurement_count(),
            offset_error_us: self.offset_error_us(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(client_mid_us: i64, raw_offset_us: f64) -> OffsetSample {
        OffsetSample {
            raw_offset_us,
            client_mid_us,
            rtt_us: 2_000,
        }
    }

    #[test]
    fn not_ready_until_second_measurement() {
        let filter = ClockFilter::new();
        assert!(!filter.is_ready());
        filter.update(&sample(0, 10_000.0));
        assert!(!filter.is_ready());
        filter.update(&sample(1_000_000, 10_050.0));
        assert!(filter.is_ready());
    }

    #[test]
    fn readiness_is_monotonic_until_reset() {
        let filter = ClockFilter::new();
        filter.update(&sample(0, 1_000.0));
        filter.update(&sample(1_000_000, 1_010.0));
        assert!(filter.is_ready());
        filter.update(&sample(2_000_000, 1_020.0));
        assert!(filter.is_ready());
        filter.reset();
        assert!(!filter.is_ready());
    }

    #[test]
    fn predict_at_is_stable_without_update() {
        let filter = ClockFilter::new();
        filter.update(&sample(0, 5_000.0));
        filter.update(&sample(1_000_000, 5_010.0));
        let a = filter.predict_at(2_000_000);
        let b = filter.predict_at(2_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn converges_under_constant_offset() {
        let filter = ClockFilter::new();
        let true_offset = 25_000.0;
        for i in 0..200 {
            let t = i * 100_000;
            filter.update(&sample(t, true_offset));
        }
        let predicted = filter.predict_at(200 * 100_000);
        let actual = 200 * 100_000 + true_offset as i64;
        assert!(
            (predicted - actual).abs() < 500,
            "predicted {predicted} actual {actual}"
        );
    }

    #[test]
    fn tracks_constant_drift() {
        let filter = ClockFilter::new();
        let drift_per_us = 100e-6; // 100 ppm
        let mut true_offset = 0.0f64;
        let mut t = 0i64;
        for _ in 0..400 {
            filter.update(&sample(t, true_offset));
            t += 100_000;
            true_offset += drift_per_us * 100_000.0;
        }
        let recovered_drift = filter.drift_rate();
        assert!(
            (recovered_drift - drift_per_us).abs() < drift_per_us * 0.5,
            "recovered {recovered_drift} expected ~{drift_per_us}"
        );
    }

    #[test]
    fn absorbs_step_change_without_permanent_rejection() {
        let filter = ClockFilter::new();
        for i in 0..20 {
            filter.update(&sample(i * 100_000, 1_000.0));
        }
        // Step change: server offset jumps by 50ms.
        for i in 20..80 {
            filter.update(&sample(i * 100_000, 51_000.0));
        }
        let predicted = filter.predict_at(79 * 100_000);
        let actual = 79 * 100_000 + 51_000;
        assert!(
            (predicted - actual).abs() < 3_000,
            "filter failed to absorb step change: predicted {predicted} actual {actual}"
        );
    }

    #[test]
    fn step_change_inflates_offset_variance_then_reshrinks() {
        let filter = ClockFilter::new();
        for i in 0..20 {
            filter.update(&sample(i * 100_000, 1_000.0));
        }
        let settled_error = filter.offset_error_us();

        // A single large step pushes the normalized innovation way out,
        // which must inflate Q (and so the post-update P) rather than
        // leave it untouched.
        filter.update(&sample(20 * 100_000, 51_000.0));
        let spiked_error = filter.offset_error_us();
        assert!(
            spiked_error > settled_error,
            "a step-sized innovation must inflate P, not leave it at {settled_error}"
        );

        // Once the filter has re-converged on the new offset, a run of
        // consistent measurements shrinks P back down again.
        for i in 21..80 {
            filter.update(&sample(i * 100_000, 51_000.0));
        }
        let reshrunk_error = filter.offset_error_us();
        assert!(
            reshrunk_error < spiked_error,
            "P must shrink again once the filter re-settles: spiked {spiked_error} reshrunk {reshrunk_error}"
        );
    }

    #[test]
    fn drift_never_decays_without_measurements() {
        let filter = ClockFilter::new();
        filter.update(&sample(0, 0.0));
        filter.update(&sample(1_000_000, 1.0));
        let drift_after_update = filter.drift_rate();
        // predict_at does not call update(); drift must not move on its own.
        let _ = filter.predict_at(10_000_000);
        assert_eq!(filter.drift_rate(), drift_after_update);
    }
}
