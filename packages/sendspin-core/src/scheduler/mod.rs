//! C5: sync audio scheduler.
//!
//! Owns the chunk queue, the anchor/generation bookkeeping, the playback
//! state machine, and the drift-correction logic that keeps local output
//! in lock-step with [`crate::filter::ClockFilter`]'s time mapping.
//!
//! Concurrency discipline: [`SyncScheduler::enqueue_chunk`] takes only the
//! chunk queue's own lock; [`SyncScheduler::tick`] takes `state_lock` only
//! for short reads/writes and never holds it across
//! [`crate::sink::AudioSink::write`].

pub mod codec_decoder;
mod drift;
mod queue;

pub use drift::{AdaptiveThreshold, SyncAction, SyncCorrectionEvent};
pub use queue::{ChunkQueue, ChunkQueueEntry};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{EventEmitter, SchedulerEvent};
use crate::filter::ClockFilter;
use crate::protocol::constants::{FUTURE_THRESHOLD_MS, LATE_THRESHOLD_MS};
use crate::protocol::messages::PlayerStateTag;
use crate::sink::AudioSink;

/// C5 playback states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    WaitForSync,
    WaitForStart,
    Playing,
    Paused,
    Draining,
}

impl PlaybackState {
    /// Telemetry string reported in `player/state`. `WaitForSync` and
    /// `WaitForStart` both report `"buffering"`, since the server only
    /// cares that playback hasn't started yet.
    pub fn telemetry_tag(self) -> PlayerStateTag {
        match self {
            PlaybackState::Idle | PlaybackState::WaitForSync | PlaybackState::WaitForStart => {
                PlayerStateTag::Buffering
            }
            PlaybackState::Playing => PlayerStateTag::Playing,
            PlaybackState::Paused => PlayerStateTag::Paused,
            PlaybackState::Draining => PlayerStateTag::Stopped,
        }
    }
}

/// Maps a generation's first chunk to an output frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub server_us_of_frame_zero: i64,
    pub frames_at_anchor: u64,
    pub last_calibration_client_us: i64,
}

/// Scheduler state guarded by `state_lock`.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub state: PlaybackState,
    pub current_generation: u64,
    pub anchor: Option<Anchor>,
    pub pending_frames: u64,
    pub total_frames_written: u64,
    pub sync_adjustments: u64,
    pub volume: f32,
    pub pause_position_us: Option<i64>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            current_generation: 0,
            anchor: None,
            pending_frames: 0,
            total_frames_written: 0,
            sync_adjustments: 0,
            volume: 1.0,
            pause_position_us: None,
        }
    }
}

/// The sync audio scheduler. Generic over the audio sink so tests can
/// substitute [`crate::sink::RecordingSink`] for a real device.
pub struct SyncScheduler<S: AudioSink> {
    queue: ChunkQueue,
    state: Mutex<SchedulerState>,
    filter: Arc<ClockFilter>,
    sink: Mutex<S>,
    threshold: Mutex<AdaptiveThreshold>,
    emitter: Arc<dyn EventEmitter>,
    frames_played: AtomicU64,
    channels: Mutex<u8>,
    sample_rate_hz: Mutex<u32>,
    /// Preallocated at `start_stream` time; reused for both underrun
    /// masking and `Insert` correction padding, and for scratch space when
    /// applying a `Drop` correction, so the hot tick path never allocates.
    silence: Mutex<Vec<i16>>,
}

/// Silence buffer reused across underrun ticks; preallocated at configure
/// time so the hot audio path never allocates.
const SILENCE_FRAMES: usize = 960; // 20ms at 48kHz

impl<S: AudioSink> SyncScheduler<S> {
    pub fn new(filter: Arc<ClockFilter>, sink: S, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            queue: ChunkQueue::with_default_capacity(),
            state: Mutex::new(SchedulerState::default()),
            filter,
            sink: Mutex::new(sink),
            threshold: Mutex::new(AdaptiveThreshold::new()),
            emitter,
            frames_played: AtomicU64::new(0),
            channels: Mutex::new(2),
            sample_rate_hz: Mutex::new(48_000),
            silence: Mutex::new(vec![0i16; SILENCE_FRAMES * 2]),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state.lock().clone()
    }

    /// Total frames dequeued from the chunk queue so far (played or
    /// dropped) — the complement of `pending_frames`.
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Acquire)
    }

    fn set_state(&self, new: PlaybackState) {
        let mut state = self.state.lock();
        if state.state == new {
            return;
        }
        let old = state.state;
        state.state = new;
        drop(state);
        self.emitter.emit_scheduler(SchedulerEvent::StateChanged {
            from: format!("{old:?}"),
            to: format!("{new:?}"),
            tag: new.telemetry_tag(),
        });
    }

    /// Configures the sink and decoder channel/rate for a new stream.
    /// Always opens a new generation, even if only the codec changed —
    /// simpler than reconfiguring the existing decoder/anchor in place,
    /// and sample rate may have changed too.
    pub fn start_stream(&self, channels: u8, sample_rate_hz: u32) -> Result<(), String> {
        *self.channels.lock() = channels;
        *self.sample_rate_hz.lock() = sample_rate_hz;
        self.sink.lock().configure(channels, sample_rate_hz)?;
        *self.silence.lock() = vec![0i16; SILENCE_FRAMES * channels.max(1) as usize];

        let mut state = self.state.lock();
        state.current_generation += 1;
        state.anchor = None;
        drop(state);
        self.emitter
            .emit_scheduler(SchedulerEvent::GenerationAdvanced {
                generation: self.state.lock().current_generation,
            });

        let is_ready = self.filter.is_ready();
        self.set_state(if is_ready {
            PlaybackState::WaitForStart
        } else {
            PlaybackState::WaitForSync
        });
        Ok(())
    }

    /// Enqueues a decoded chunk. Takes only the queue's own lock — never
    /// `state_lock` — so the network/decode context never blocks on the
    /// audio tick.
    pub fn enqueue_chunk(&self, entry: ChunkQueueEntry) {
        let frame_count = entry.frame_count as u64;
        let dropped = self.queue.push(entry);
        if dropped {
            self.emitter.emit_scheduler(SchedulerEvent::ChunkDropped {
                reason: "queue_overflow",
                target_server_us: 0,
            });
        }
        let mut state = self.state.lock();
        state.pending_frames += frame_count;
        state.total_frames_written += frame_count;
    }

    /// Runs one scheduling step: advances `WaitForSync`/`WaitForStart`,
    /// and while `Playing`, pops and plays (or drops) the next chunk,
    /// masking underrun with silence. `now_client_us` is the caller's
    /// current monotonic time, used to query the clock filter.
    pub fn tick(&self, now_client_us: i64) -> Option<SyncCorrectionEvent> {
        let current = self.state.lock().state;

        match current {
            PlaybackState::Idle | PlaybackState::Paused | PlaybackState::Draining => None,
            PlaybackState::WaitForSync => {
                if self.filter.is_ready() {
                    self.set_state(PlaybackState::WaitForStart);
                }
                None
            }
            PlaybackState::WaitForStart => {
                if let Some(entry) = self.queue.peek_front() {
                    let frames_at_anchor = self.sink.lock().position_frames();
                    let mut state = self.state.lock();
                    state.anchor = Some(Anchor {
                        server_us_of_frame_zero: entry.target_server_us,
                        frames_at_anchor,
                        last_calibration_client_us: now_client_us,
                    });
                    drop(state);
                    self.set_state(PlaybackState::Playing);
                    self.play_next(now_client_us)
                } else {
                    None
                }
            }
            PlaybackState::Playing => self.play_next(now_client_us),
        }
    }

    fn play_next(&self, now_client_us: i64) -> Option<SyncCorrectionEvent> {
        let predicted_now = self.filter.predict_at(now_client_us);
        let channels = (*self.channels.lock()).max(1) as usize;

        let Some(entry) = self.queue.pop_front() else {
            // Underrun: mask with preallocated silence, state unchanged.
            let _ = self.sink.lock().write(&self.silence.lock());
            self.emitter.emit_scheduler(SchedulerEvent::Underrun);
            return None;
        };

        {
            let mut state = self.state.lock();
            state.pending_frames = state.pending_frames.saturating_sub(entry.frame_count as u64);
        }
        self.frames_played
            .fetch_add(entry.frame_count as u64, Ordering::AcqRel);

        if entry.stream_generation != self.state.lock().current_generation {
            // Stale chunk from a generation `flush()`/`start_stream()` has
            // already moved past — possibly one enqueued in the race window
            // between the queue clear and the generation bump. Never played.
            self.emitter.emit_scheduler(SchedulerEvent::ChunkDropped {
                reason: "stale_generation",
                target_server_us: entry.target_server_us,
            });
            return None;
        }

        if entry.target_server_us + LATE_THRESHOLD_MS * 1000 < predicted_now {
            self.emitter.emit_scheduler(SchedulerEvent::ChunkDropped {
                reason: "late",
                target_server_us: entry.target_server_us,
            });
            return None;
        }
        if entry.target_server_us - FUTURE_THRESHOLD_MS * 1000 > predicted_now {
            self.emitter.emit_scheduler(SchedulerEvent::ChunkDropped {
                reason: "future",
                target_server_us: entry.target_server_us,
            });
            return None;
        }

        let sample_rate_hz = *self.sample_rate_hz.lock();
        // A flush while already Playing clears the anchor without passing
        // back through WaitForStart; re-establish it from this chunk so
        // drift correction doesn't stay dark for the rest of the session.
        let needs_anchor = self.state.lock().anchor.is_none();
        let anchor = if needs_anchor {
            // Lock order matches the WaitForStart path: sink before state.
            let frames_at_anchor = self.sink.lock().position_frames();
            let mut state = self.state.lock();
            let established = Anchor {
                server_us_of_frame_zero: entry.target_server_us,
                frames_at_anchor,
                last_calibration_client_us: now_client_us,
            };
            state.anchor = Some(established);
            Some(established)
        } else {
            self.state.lock().anchor
        };

        // Drift correction is decided against the DAC position *before*
        // this chunk is written, then applied to this same chunk: Insert
        // pads it with silence frames, Drop trims leading frames.
        let correction = anchor.map(|anchor| {
            let position = self.sink.lock().position_frames();
            let dac_observed_server_us = anchor.server_us_of_frame_zero
                + ((position.saturating_sub(anchor.frames_at_anchor)) as i64 * 1_000_000)
                    / sample_rate_hz as i64;
            let mut threshold = self.threshold.lock();
            threshold.evaluate(now_client_us, predicted_now, dac_observed_server_us, sample_rate_hz)
        });

        match correction.map(|c| c.action) {
            Some(SyncAction::Insert(n)) => {
                let _ = self.sink.lock().write(&entry.pcm);
                let pad_frames = (n as usize).min(SILENCE_FRAMES);
                let pad = &self.silence.lock()[..pad_frames * channels];
                let _ = self.sink.lock().write(pad);
            }
            Some(SyncAction::Drop(n)) => {
                let drop_frames = (n as usize).min(entry.frame_count as usize);
                let _ = self.sink.lock().write(&entry.pcm[drop_frames * channels..]);
            }
            _ => {
                let _ = self.sink.lock().write(&entry.pcm);
            }
        }

        if let Some(ref event) = correction {
            if !matches!(event.action, SyncAction::Hold) {
                self.state.lock().sync_adjustments += 1;
            }
            self.emitter
                .emit_scheduler(SchedulerEvent::Correction(*event));
        }
        correction
    }

    pub fn pause(&self, position_us: i64) {
        {
            let mut state = self.state.lock();
            state.pause_position_us = Some(position_us);
        }
        self.set_state(PlaybackState::Paused);
    }

    pub fn resume(&self) {
        {
            let mut state = self.state.lock();
            state.pause_position_us = None;
            state.anchor = None; // re-anchor on next chunk, per resume semantics
        }
        self.set_state(PlaybackState::WaitForStart);
    }

    /// Stops playback and drops all queued audio. Idempotent.
    pub fn stop(&self) {
        if self.state.lock().state == PlaybackState::Idle {
            return;
        }
        self.set_state(PlaybackState::Draining);
        self.queue.clear();
        {
            let mut state = self.state.lock();
            state.pending_frames = 0;
            state.anchor = None;
        }
        self.set_state(PlaybackState::Idle);
    }

    /// Flushes queued audio, drops to `Idle`, and increments the
    /// generation so any late in-flight chunks from the old generation
    /// are recognizable as stale and discarded by `play_next`.
    pub fn flush(&self) {
        self.queue.clear();
        {
            let mut state = self.state.lock();
            state.pending_frames = 0;
            state.current_generation += 1;
            state.anchor = None;
        }
        self.set_state(PlaybackState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::sink::RecordingSink;

    fn scheduler() -> SyncScheduler<RecordingSink> {
        SyncScheduler::new(
            Arc::new(ClockFilter::new()),
            RecordingSink::default(),
            Arc::new(NoopEventEmitter),
        )
    }

    fn chunk(target_server_us: i64, generation: u64) -> ChunkQueueEntry {
        ChunkQueueEntry {
            target_server_us,
            pcm: vec![0i16; 960 * 2],
            frame_count: 960,
            stream_generation: generation,
        }
    }

    #[test]
    fn generation_is_non_decreasing_across_stream_starts() {
        let scheduler = scheduler();
        scheduler.start_stream(2, 48_000).unwrap();
        let g1 = scheduler.state().current_generation;
        scheduler.start_stream(2, 48_000).unwrap();
        let g2 = scheduler.state().current_generation;
        assert!(g2 > g1);
    }

    #[test]
    fn waits_for_sync_until_filter_ready() {
        let scheduler = scheduler();
        scheduler.start_stream(2, 48_000).unwrap();
        assert_eq!(scheduler.state().state, PlaybackState::WaitForSync);
        scheduler.tick(0);
        assert_eq!(scheduler.state().state, PlaybackState::WaitForSync);
    }

    #[test]
    fn transitions_to_playing_once_ready_and_chunk_available() {
        let scheduler = scheduler();
        scheduler.filter.update(&crate::timesync::OffsetSample {
            raw_offset_us: 0.0,
            client_mid_us: 0,
            rtt_us: 1_000,
        });
        scheduler.filter.update(&crate::timesync::OffsetSample {
            raw_offset_us: 0.0,
            client_mid_us: 1_000_000,
            rtt_us: 1_000,
        });
        scheduler.start_stream(2, 48_000).unwrap();
        assert_eq!(scheduler.state().state, PlaybackState::WaitForStart);
        scheduler.enqueue_chunk(chunk(0, 1));
        scheduler.tick(0);
        assert_eq!(scheduler.state().state, PlaybackState::Playing);
    }

    #[test]
    fn underrun_does_not_change_state() {
        let scheduler = scheduler();
        scheduler.filter.update(&crate::timesync::OffsetSample {
            raw_offset_us: 0.0,
            client_mid_us: 0,
            rtt_us: 1_000,
        });
        scheduler.filter.update(&crate::timesync::OffsetSample {
            raw_offset_us: 0.0,
            client_mid_us: 1_000_000,
            rtt_us: 1_000,
        });
        scheduler.start_stream(2, 48_000).unwrap();
        scheduler.enqueue_chunk(chunk(0, 1));
        scheduler.tick(0); // establishes anchor, plays first chunk
        assert_eq!(scheduler.state().state, PlaybackState::Playing);
        scheduler.tick(20_000); // queue now empty: underrun
        assert_eq!(scheduler.state().state, PlaybackState::Playing);
    }

    #[test]
    fn chunk_ordering_within_generation_is_non_decreasing() {
        let scheduler = scheduler();
        for t in [0, 20_000, 40_000, 60_000] {
            scheduler.enqueue_chunk(chunk(t, 1));
        }
        let mut last = i64::MIN;
        while let Some(entry) = scheduler.queue.pop_front() {
            assert!(entry.target_server_us >= last);
            last = entry.target_server_us;
        }
    }

    #[test]
    fn frame_accounting_identity_holds() {
        let scheduler = scheduler();
        for t in [0, 20_000, 40_000] {
            scheduler.enqueue_chunk(chunk(t, 1));
        }
        let state = scheduler.state();
        assert_eq!(
            state.total_frames_written,
            scheduler.frames_played() + state.pending_frames
        );

        scheduler.start_stream(2, 48_000).unwrap();
        scheduler.tick(0);
        let state = scheduler.state();
        assert_eq!(
            state.total_frames_written,
            scheduler.frames_played() + state.pending_frames
        );
    }

    #[test]
    fn stop_is_idempotent() {
        let scheduler = scheduler();
        scheduler.start_stream(2, 48_000).unwrap();
        scheduler.enqueue_chunk(chunk(0, 1));
        scheduler.stop();
        scheduler.stop();
        assert_eq!(scheduler.state().state, PlaybackState::Idle);
        assert!(scheduler.queue.is_empty());
    }

    #[test]
    fn flush_clears_queue_and_advances_generation() {
        let scheduler = scheduler();
        scheduler.start_stream(2, 48_000).unwrap();
        scheduler.enqueue_chunk(chunk(0, 1));
        let before = scheduler.state().current_generation;
        scheduler.flush();
        assert!(scheduler.queue.is_empty());
        assert!(scheduler.state().current_generation > before);
        assert_eq!(scheduler.state().state, PlaybackState::Idle);
    }

    #[test]
    fn stale_generation_chunk_is_dropped_without_reaching_sink() {
        let scheduler = scheduler();
        scheduler.filter.update(&crate::timesync::OffsetSample {
            raw_offset_us: 0.0,
            client_mid_us: 0,
            rtt_us: 1_000,
        });
        scheduler.filter.update(&crate::timesync::OffsetSample {
            raw_offset_us: 0.0,
            client_mid_us: 1_000_000,
            rtt_us: 1_000,
        });
        scheduler.start_stream(2, 48_000).unwrap();
        let current = scheduler.state().current_generation;
        // Simulates a chunk that snuck into the queue between flush()'s
        // queue-clear and its generation bump: it's tagged with the old
        // generation and must never be played, even though it would
        // otherwise pass the late/future checks.
        scheduler.enqueue_chunk(chunk(0, current - 1));
        scheduler.enqueue_chunk(chunk(20_000, current));
        scheduler.tick(0); // establishes anchor, pops and drops the stale entry
        assert!(
            scheduler.sink.lock().written.is_empty(),
            "the stale-generation chunk must never reach the sink"
        );

        scheduler.tick(20_000); // pops and plays the current-generation entry
        assert!(
            !scheduler.sink.lock().written.is_empty(),
            "the current-generation chunk should still play"
        );
        assert_eq!(scheduler.state().state, PlaybackState::Playing);
    }

    #[test]
    fn waitforsync_and_waitforstart_report_buffering() {
        assert_eq!(
            PlaybackState::WaitForSync.telemetry_tag(),
            PlayerStateTag::Buffering
        );
        assert_eq!(
            PlaybackState::WaitForStart.telemetry_tag(),
            PlayerStateTag::Buffering
        );
    }

    #[test]
    fn late_chunk_is_dropped_not_played() {
        let scheduler = scheduler();
        scheduler.filter.update(&crate::timesync::OffsetSample {
            raw_offset_us: 0.0,
            client_mid_us: 0,
            rtt_us: 1_000,
        });
        scheduler.filter.update(&crate::timesync::OffsetSample {
            raw_offset_us: 0.0,
            client_mid_us: 1_000_000,
            rtt_us: 1_000,
        });
        scheduler.start_stream(2, 48_000).unwrap();
        // First chunk establishes the anchor at t=0.
        scheduler.enqueue_chunk(chunk(0, 1));
        scheduler.tick(0);
        // Second chunk is 300ms "late" relative to now.
        scheduler.enqueue_chunk(chunk(-300_000, 1));
        let written_before = {
            let sink = scheduler.sink.lock();
            sink.written.len()
        };
        scheduler.tick(1_000_000);
        let written_after = {
            let sink = scheduler.sink.lock();
            sink.written.len()
        };
        // The late chunk's samples must not have been written to the sink.
        assert_eq!(written_after, written_before);
    }
}
