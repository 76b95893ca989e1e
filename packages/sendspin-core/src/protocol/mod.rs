//! C1: message codec. Text (JSON) control messages and the binary audio
//! record header, multiplexed over one WebSocket connection by
//! [`crate::transport`].

pub mod codec;
pub mod constants;
pub mod messages;

pub use codec::{decode_record, encode_record, AudioRecord, CodecTag, RecordCodecError};
pub use messages::{ControlMessage, DeviceInfo, PlayerStateTag};
