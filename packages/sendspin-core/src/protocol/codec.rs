//! Binary audio record codec (C1 binary channel).
//!
//! Wire layout, little-endian, 32-byte header followed by `payload_len`
//! bytes of payload:
//!
//! | offset | field             | type |
//! |--------|-------------------|------|
//! | 0      | version           | u8   |
//! | 1      | codec_tag         | u8   |
//! | 2      | channels          | u8   |
//! | 3      | reserved          | u8   |
//! | 4      | sample_rate_hz    | u32  |
//! | 8      | stream_id         | u32  |
//! | 12     | chunk_seq         | u64  |
//! | 20     | target_server_us  | i64  |
//! | 28     | payload_len       | u32  |

use bytes::{Bytes, BytesMut};

use crate::protocol::constants::{RECORD_HEADER_LEN, RECORD_VERSION};

/// Codec tag carried in the binary header, identifying how `payload`
/// should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecTag {
    Pcm,
    Opus,
    Flac,
    Unknown(u8),
}

impl From<u8> for CodecTag {
    fn from(value: u8) -> Self {
        match value {
            0 => CodecTag::Pcm,
            1 => CodecTag::Opus,
            2 => CodecTag::Flac,
            other => CodecTag::Unknown(other),
        }
    }
}

impl From<CodecTag> for u8 {
    fn from(tag: CodecTag) -> Self {
        match tag {
            CodecTag::Pcm => 0,
            CodecTag::Opus => 1,
            CodecTag::Flac => 2,
            CodecTag::Unknown(v) => v,
        }
    }
}

/// A decoded audio record: header fields plus the still-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRecord {
    pub stream_id: u32,
    pub chunk_seq: u64,
    pub target_server_us: i64,
    pub codec_tag: u8,
    pub channels: u8,
    pub sample_rate_hz: u32,
    pub frame_count: u32,
    pub payload: Bytes,
}

/// Errors returned while decoding a binary audio record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordCodecError {
    #[error("record too short: {0} bytes, need at least {RECORD_HEADER_LEN}")]
    TooShort(usize),
    #[error("payload length mismatch: header says {declared}, got {actual}")]
    PayloadLengthMismatch { declared: u32, actual: usize },
    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u8),
}

/// `frame_count` is not carried on the wire directly — it is derived from
/// the payload size, channel count and codec, so PCM records can be
/// validated without a separate counter that could drift from the payload.
fn pcm_frame_count(payload_len: usize, channels: u8) -> u32 {
    let bytes_per_frame = 2usize * channels.max(1) as usize; // i16 samples
    (payload_len / bytes_per_frame) as u32
}

/// Encodes an audio record into a single contiguous buffer (header +
/// payload), ready to send as one binary WebSocket frame.
pub fn encode_record(
    stream_id: u32,
    chunk_seq: u64,
    target_server_us: i64,
    codec_tag: CodecTag,
    channels: u8,
    sample_rate_hz: u32,
    payload: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN + payload.len());
    buf.extend_from_slice(&[RECORD_VERSION, codec_tag.into(), channels, 0]);
    buf.extend_from_slice(&sample_rate_hz.to_le_bytes());
    buf.extend_from_slice(&stream_id.to_le_bytes());
    buf.extend_from_slice(&chunk_seq.to_le_bytes());
    buf.extend_from_slice(&target_server_us.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Decodes a binary audio record from a single WebSocket binary frame.
pub fn decode_record(frame: &[u8]) -> Result<AudioRecord, RecordCodecError> {
    if frame.len() < RECORD_HEADER_LEN {
        return Err(RecordCodecError::TooShort(frame.len()));
    }

    let version = frame[0];
    if version != RECORD_VERSION {
        return Err(RecordCodecError::UnsupportedVersion(version));
    }
    let codec_tag = frame[1];
    let channels = frame[2];
    let sample_rate_hz = u32::from_le_bytes(frame[4..8].try_into().unwrap());
    let stream_id = u32::from_le_bytes(frame[8..12].try_into().unwrap());
    let chunk_seq = u64::from_le_bytes(frame[12..20].try_into().unwrap());
    let target_server_us = i64::from_le_bytes(frame[20..28].try_into().unwrap());
    let payload_len = u32::from_le_bytes(frame[28..32].try_into().unwrap());

    let payload = &frame[RECORD_HEADER_LEN..];
    if payload.len() != payload_len as usize {
        return Err(RecordCodecError::PayloadLengthMismatch {
            declared: payload_len,
            actual: payload.len(),
        });
    }

    let frame_count = if CodecTag::from(codec_tag) == CodecTag::Pcm {
        pcm_frame_count(payload.len(), channels)
    } else {
        0 // non-PCM frame counts come from the decoder, not the header
    };

    Ok(AudioRecord {
        stream_id,
        chunk_seq,
        target_server_us,
        codec_tag,
        channels,
        sample_rate_hz,
        frame_count,
        payload: Bytes::copy_from_slice(payload),
    })
}
