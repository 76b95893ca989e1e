//! Local audio output abstraction.
//!
//! A SendSpin player owns the local audio device directly, unlike a
//! server that only streams PCM/WAV over the network to other hardware.
//! `CpalSink` runs the cpal host API on a dedicated OS thread since it is
//! not `Send`.

mod cpal_sink;

pub use cpal_sink::CpalSink;

/// Local audio output device, abstracted so the scheduler can be tested
/// without a real sound card.
///
/// `position_frames` is the scheduler's only window into "what has the
/// DAC actually played" — it must be monotonically non-decreasing and
/// reflect frames that have left the sink, not merely been queued to it.
pub trait AudioSink: Send {
    fn configure(&mut self, channels: u8, sample_rate_hz: u32) -> Result<(), String>;

    /// Queues frames for output. Must not block for longer than the
    /// device's own buffering requires; the scheduler never holds its
    /// `state_lock` across this call.
    fn write(&mut self, frames: &[i16]) -> Result<(), String>;

    /// Total interleaved sample-frames the device has output so far.
    fn position_frames(&self) -> u64;
}

/// In-memory sink used by tests and by any host that wants to observe
/// scheduler output without a real device.
#[derive(Default)]
pub struct RecordingSink {
    pub channels: u8,
    pub sample_rate_hz: u32,
    pub written: Vec<i16>,
    position_frames: u64,
}

impl AudioSink for RecordingSink {
    fn configure(&mut self, channels: u8, sample_rate_hz: u32) -> Result<(), String> {
        self.channels = channels;
        self.sample_rate_hz = sample_rate_hz;
        Ok(())
    }

    fn write(&mut self, frames: &[i16]) -> Result<(), String> {
        self.written.extend_from_slice(frames);
        let channels = self.channels.max(1) as u64;
        self.position_frames += frames.len() as u64 / channels;
        Ok(())
    }

    fn position_frames(&self) -> u64 {
        self.position_frames
    }
}
