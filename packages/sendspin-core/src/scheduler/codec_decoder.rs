//! Codec interaction contract for C5: `configure` / `decode` / `flush` /
//! `release`, with the Opus retry-before-erroring policy and the PCM
//! fallback applied when a session's very first decode fails twice.

use crate::protocol::codec::CodecTag;

/// Parameters a decoder is configured with at stream start or on a new
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub channels: u8,
    pub sample_rate_hz: u32,
}

/// A codec backend's decode-side contract.
pub trait Decoder: Send {
    fn configure(&mut self, params: CodecParams) -> Result<(), String>;
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, String>;
    fn flush(&mut self);
    fn release(&mut self);
}

/// Raw PCM "decoder": payload bytes are already little-endian i16 samples.
#[derive(Default)]
pub struct PcmDecoder;

impl Decoder for PcmDecoder {
    fn configure(&mut self, _params: CodecParams) -> Result<(), String> {
        Ok(())
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, String> {
        if payload.len() % 2 != 0 {
            return Err("PCM payload length is not a multiple of 2".into());
        }
        Ok(payload
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    fn flush(&mut self) {}
    fn release(&mut self) {}
}

/// Opus decoder backed by the `opus` crate. Reconfigured on every new
/// generation rather than in place.
pub struct OpusDecoder {
    inner: Option<opus::Decoder>,
    channels: u8,
}

impl Default for OpusDecoder {
    fn default() -> Self {
        Self {
            inner: None,
            channels: 2,
        }
    }
}

impl Decoder for OpusDecoder {
    fn configure(&mut self, params: CodecParams) -> Result<(), String> {
        let channels = match params.channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            other => return Err(format!("unsupported opus channel count: {other}")),
        };
        self.channels = params.channels;
        self.inner = Some(
            opus::Decoder::new(params.sample_rate_hz, channels)
                .map_err(|e| format!("opus decoder init failed: {e}"))?,
        );
        Ok(())
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, String> {
        let decoder = self
            .inner
            .as_mut()
            .ok_or_else(|| "opus decoder not configured".to_string())?;
        // Worst case a single Opus frame decodes to 120ms at 48kHz.
        let max_frame_samples = 48_000 * 120 / 1000 * self.channels.max(1) as usize;
        let mut out = vec![0i16; max_frame_samples];
        let decoded = decoder
            .decode(payload, &mut out, false)
            .map_err(|e| format!("opus decode failed: {e}"))?;
        out.truncate(decoded * self.channels.max(1) as usize);
        Ok(out)
    }

    fn flush(&mut self) {
        self.inner = None;
    }

    fn release(&mut self) {
        self.inner = None;
    }
}

/// Wraps a decoder with the scheduler's codec-failure policy: a single
/// in-place retry of the same packet on decode failure, and — only for
/// the very first decode of a session — falling back to treating the
/// stream as raw PCM if both attempts fail, since some servers mislabel
/// the initial codec tag.
pub struct ResilientDecoder {
    tag: CodecTag,
    decoder: Box<dyn Decoder>,
    params: CodecParams,
    decoded_any: bool,
}

impl ResilientDecoder {
    pub fn new(tag: CodecTag, params: CodecParams) -> Result<Self, String> {
        let mut decoder = Self::build(tag)?;
        decoder.configure(params)?;
        Ok(Self {
            tag,
            decoder,
            params,
            decoded_any: false,
        })
    }

    fn build(tag: CodecTag) -> Result<Box<dyn Decoder>, String> {
        match tag {
            CodecTag::Pcm => Ok(Box::new(PcmDecoder)),
            CodecTag::Opus => Ok(Box::new(OpusDecoder::default())),
            CodecTag::Flac => Err("FLAC decoding is not implemented".into()),
            CodecTag::Unknown(v) => Err(format!("unknown codec tag: {v}")),
        }
    }

    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, String> {
        match self.decoder.decode(payload) {
            Ok(pcm) => {
                self.decoded_any = true;
                Ok(pcm)
            }
            Err(first_err) => match self.decoder.decode(payload) {
                Ok(pcm) => {
                    self.decoded_any = true;
                    Ok(pcm)
                }
                Err(second_err) => {
                    if !self.decoded_any && self.tag != CodecTag::Pcm {
                        self.tag = CodecTag::Pcm;
                        self.decoder = Box::new(PcmDecoder);
                        self.decoder.configure(self.params)?;
                        return self.decoder.decode(payload);
                    }
                    Err(format!(
                        "decode failed twice: first={first_err} second={second_err}"
                    ))
                }
            },
        }
    }

    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    pub fn release(&mut self) {
        self.decoder.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_decodes_little_endian_samples() {
        let mut decoder = PcmDecoder;
        decoder.configure(CodecParams { channels: 2, sample_rate_hz: 48_000 }).unwrap();
        let payload = [0x01, 0x00, 0xFF, 0xFF];
        let samples = decoder.decode(&payload).unwrap();
        assert_eq!(samples, vec![1, -1]);
    }

    #[test]
    fn pcm_rejects_odd_length_payload() {
        let mut decoder = PcmDecoder;
        assert!(decoder.decode(&[0x01]).is_err());
    }

    #[test]
    fn resilient_decoder_falls_back_to_pcm_on_first_decode_failure() {
        let params = CodecParams {
            channels: 2,
            sample_rate_hz: 48_000,
        };
        let mut decoder = ResilientDecoder::new(CodecTag::Opus, params).unwrap();
        // A 4-byte buffer is too short to be a valid Opus packet, so both
        // opus decode attempts fail; since nothing has decoded yet this is
        // the session's first decode, so the scheduler falls back to raw
        // PCM and the same bytes decode cleanly as two i16 samples.
        let payload = [0x02, 0x00, 0x03, 0x00];
        let samples = decoder.decode(&payload).expect("pcm fallback should succeed");
        assert_eq!(samples, vec![2, 3]);
        assert_eq!(decoder.tag, CodecTag::Pcm);
    }
}
