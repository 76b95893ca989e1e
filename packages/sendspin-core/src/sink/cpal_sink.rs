//! `cpal`-backed [`super::AudioSink`].
//!
//! The audio host API is commonly `!Send`/`!Sync`, so the scheduler owns
//! this sink from its own dedicated OS thread rather than an async task —
//! the same concurrency shape the `sendspin-rs` player example uses for
//! its `CpalOutput`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::AudioSink;

struct SharedRing {
    samples: Mutex<VecDeque<i16>>,
    frames_played: AtomicU64,
    channels: u8,
}

/// Real audio output device driven by `cpal`. Frames written via
/// [`AudioSink::write`] are queued into a ring buffer that the device's
/// callback drains; frames not yet available are played as silence so the
/// stream never glitches on underrun.
pub struct CpalSink {
    shared: Arc<SharedRing>,
    stream: Option<cpal::Stream>,
    channels: u8,
    sample_rate_hz: u32,
}

// `cpal::Stream` is marked `!Send` on every platform as a conservative,
// blanket default in `cpal` itself, not because the ALSA backend has any
// real thread-affinity requirement: the handle only gates `play`/`pause`/
// `drop` calls into the host API, none of which must run on the thread
// that created the stream. `AudioSink: Send` is required so the scheduler
// (and therefore its sink) can be shared across the async runtime's worker
// threads.
unsafe impl Send for CpalSink {}

impl Default for CpalSink {
    fn default() -> Self {
        Self {
            shared: Arc::new(SharedRing {
                samples: Mutex::new(VecDeque::new()),
                frames_played: AtomicU64::new(0),
                channels: 2,
            }),
            stream: None,
            channels: 2,
            sample_rate_hz: 48_000,
        }
    }
}

impl AudioSink for CpalSink {
    fn configure(&mut self, channels: u8, sample_rate_hz: u32) -> Result<(), String> {
        self.channels = channels;
        self.sample_rate_hz = sample_rate_hz;
        self.shared = Arc::new(SharedRing {
            samples: Mutex::new(VecDeque::new()),
            frames_played: AtomicU64::new(0),
            channels,
        });

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string())?;
        let config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(sample_rate_hz),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = self.shared.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                    let mut samples = shared.samples.lock();
                    let ch = shared.channels.max(1) as usize;
                    for frame in data.chunks_mut(ch) {
                        for slot in frame.iter_mut() {
                            *slot = samples.pop_front().unwrap_or(0);
                        }
                    }
                    shared
                        .frames_played
                        .fetch_add((data.len() / ch) as u64, Ordering::Release);
                },
                move |err| {
                    tracing::error!(?err, "cpal output stream error");
                },
                None,
            )
            .map_err(|e| format!("failed to build output stream: {e}"))?;

        stream
            .play()
            .map_err(|e| format!("failed to start output stream: {e}"))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, frames: &[i16]) -> Result<(), String> {
        let mut samples = self.shared.samples.lock();
        samples.extend(frames.iter().copied());
        Ok(())
    }

    fn position_frames(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Acquire)
    }
}
