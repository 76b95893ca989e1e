//! Burst-of-8 probing state machine and burst aggregation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use crate::events::{EventEmitter, SyncEvent};
use crate::filter::ClockFilter;
use crate::protocol::constants::{
    BURST_SIZE, BURST_TIMEOUT_MS, BURST_WINNERS, PROBE_SPACING_MS, RTT_DISCARD_MAX_US,
    RTT_FLOOR_REJECT_MARGIN_US, RTT_FLOOR_REJECT_MULTIPLIER,
};
use crate::protocol::messages::ControlMessage;
use crate::timesync::{OffsetSample, RttFloorEstimator, WelfordStats};

/// C3 state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSyncState {
    Idle,
    Bursting,
    Waiting,
}

/// Summary of one burst's aggregation, for logging/tests.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub rtt_floor_us: i64,
}

struct TimeResp {
    server_received_us: i64,
    server_transmitted_us: i64,
}

/// Drives repeated bursts of time-sync probes and feeds accepted samples
/// into a [`ClockFilter`].
pub struct TimeSyncEngine {
    state: Mutex<TimeSyncState>,
    epoch: AtomicU64,
    rtt_floor: Mutex<RttFloorEstimator>,
    offset_stats: Mutex<WelfordStats>,
    filter: Arc<ClockFilter>,
    emitter: Arc<dyn EventEmitter>,
}

impl TimeSyncEngine {
    pub fn new(filter: Arc<ClockFilter>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            state: Mutex::new(TimeSyncState::Idle),
            epoch: AtomicU64::new(0),
            rtt_floor: Mutex::new(RttFloorEstimator::new()),
            offset_stats: Mutex::new(WelfordStats::new()),
            filter,
            emitter,
        }
    }

    pub fn state(&self) -> TimeSyncState {
        *self.state.lock()
    }

    /// Cancels any in-flight burst. In-flight probe waits observe the
    /// bumped epoch on their next check and stop delivering samples,
    /// completing within one probe-timeout.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = TimeSyncState::Idle;
    }

    /// Standard deviation of recently accepted offset samples, for
    /// diagnostics only.
    pub fn offset_confidence(&self) -> crate::timesync::Confidence {
        self.offset_stats.lock().confidence()
    }

    /// Pure aggregation: sorts by RTT, keeps the lowest half, rejects the
    /// whole burst if its best RTT exceeds the sliding RTT floor by more
    /// than the configured margin. Exposed separately from the async
    /// send/receive loop so it can be unit tested without any I/O.
    pub fn aggregate_burst(&self, mut probes: Vec<OffsetSample>) -> (Vec<OffsetSample>, BurstOutcome) {
        probes.sort_by_key(|s| s.rtt_us);
        let winners: Vec<OffsetSample> = probes.into_iter().take(BURST_WINNERS).collect();
        let best_rtt = winners.first().map(|s| s.rtt_us).unwrap_or(i64::MAX);

        let floor = self.rtt_floor.lock().floor();
        let reject_ceiling = if floor == i64::MAX {
            i64::MAX
        } else {
            ((floor as f64 * RTT_FLOOR_REJECT_MULTIPLIER) as i64).max(floor + RTT_FLOOR_REJECT_MARGIN_US)
        };

        if !winners.is_empty() && best_rtt > reject_ceiling {
            let outcome = BurstOutcome {
                accepted: 0,
                rejected: winners.len(),
                rtt_floor_us: floor,
            };
            self.emitter.emit_sync(SyncEvent::BurstRejected {
                best_rtt_us: best_rtt,
                floor_us: floor,
            });
            return (Vec::new(), outcome);
        }

        {
            let mut rtt_floor = self.rtt_floor.lock();
            for w in &winners {
                rtt_floor.push(w.rtt_us);
            }
        }
        {
            let mut stats = self.offset_stats.lock();
            for w in &winners {
                stats.push(w.raw_offset_us);
            }
        }

        let outcome = BurstOutcome {
            accepted: winners.len(),
            rejected: 0,
            rtt_floor_us: self.rtt_floor.lock().floor(),
        };
        self.emitter.emit_sync(SyncEvent::BurstCompleted {
            accepted: outcome.accepted,
            rejected: outcome.rejected,
            rtt_floor_us: outcome.rtt_floor_us,
        });
        (winners, outcome)
    }

    /// Applies accepted samples to the clock filter in RTT order (the
    /// order `aggregate_burst` already returns them in).
    pub fn apply_samples(&self, samples: &[OffsetSample]) {
        let was_ready = self.filter.is_ready();
        for s in samples {
            self.filter.update(s);
        }
        if !was_ready && self.filter.is_ready() {
            self.emitter.emit_sync(SyncEvent::FilterReady);
        }
    }

    /// Drives the burst loop: sends `time/req` through `outgoing`, matches
    /// `time/resp` messages arriving on `incoming`, and repeats every
    /// `burst_interval` until `incoming` closes or [`TimeSyncEngine::cancel`]
    /// is called.
    pub async fn run(
        self: Arc<Self>,
        outgoing: mpsc::UnboundedSender<ControlMessage>,
        mut incoming: mpsc::UnboundedReceiver<ControlMessage>,
        burst_interval: Duration,
        now_client_us: impl Fn() -> i64,
    ) {
        loop {
            let my_epoch = self.epoch.load(Ordering::SeqCst);
            *self.state.lock() = TimeSyncState::Bursting;

            let mut probes = Vec::with_capacity(BURST_SIZE);
            let burst_deadline = Instant::now() + Duration::from_millis(BURST_TIMEOUT_MS);

            for _ in 0..BURST_SIZE {
                if self.epoch.load(Ordering::SeqCst) != my_epoch {
                    return;
                }
                let t1 = now_client_us();
                if outgoing
                    .send(ControlMessage::TimeReq {
                        client_transmitted_us: t1,
                    })
                    .is_err()
                {
                    return;
                }

                let remaining = burst_deadline.saturating_duration_since(Instant::now());
                let wait = Duration::from_millis(PROBE_SPACING_MS).min(remaining);
                match timeout(wait, Self::recv_matching_resp(&mut incoming, t1)).await {
                    Ok(Some(resp)) => {
                        let t4 = now_client_us();
                        let probe = OffsetSample::from_exchange(
                            t1,
                            resp.server_received_us,
                            resp.server_transmitted_us,
                            t4,
                        );
                        // A non-positive or absurdly large RTT means the
                        // exchange itself is untrustworthy (clock jump,
                        // clock-skew artifact, stalled network) regardless
                        // of what the burst aggregator would otherwise do
                        // with it.
                        if probe.rtt_us > 0 && probe.rtt_us <= RTT_DISCARD_MAX_US {
                            probes.push(probe);
                        }
                    }
                    Ok(None) => return,
                    Err(_) => {}
                }
            }

            if self.epoch.load(Ordering::SeqCst) != my_epoch {
                return;
            }

            if !probes.is_empty() {
                let (accepted, _outcome) = self.aggregate_burst(probes);
                self.apply_samples(&accepted);
            }

            *self.state.lock() = TimeSyncState::Waiting;
            sleep(burst_interval).await;
        }
    }

    async fn recv_matching_resp(
        incoming: &mut mpsc::UnboundedReceiver<ControlMessage>,
        expected_t1: i64,
    ) -> Option<TimeResp> {
        while let Some(msg) = incoming.recv().await {
            if let ControlMessage::TimeResp {
                client_transmitted_us,
                server_received_us,
                server_transmitted_us,
            } = msg
            {
                if client_transmitted_us == expected_t1 {
                    return Some(TimeResp {
                        server_received_us,
                        server_transmitted_us,
                    });
                }
            }
        }
        None
    }
}
