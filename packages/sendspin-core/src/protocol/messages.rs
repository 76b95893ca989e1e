//! JSON control messages (C1 text channel).
//!
//! Every message is a JSON object tagged by its `type` field. Binary audio
//! records are handled separately by [`crate::protocol::codec`].

use serde::{Deserialize, Serialize};

/// Device capability/identity payload sent in `client/hello`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub channels: u8,
    pub sample_rate_hz: u32,
    pub bit_depth: u8,
    pub buffer_capacity: u32,
    #[serde(default)]
    pub supported_commands: Vec<String>,
}

/// Playback state reported in `player/state`.
///
/// `Buffering` covers both `WaitForSync` and `WaitForStart` scheduler
/// states — the server only needs to know playback hasn't started yet,
/// not which kind of wait it is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStateTag {
    Buffering,
    Playing,
    Paused,
    Stopped,
}

/// All inbound/outbound control messages, tagged on the wire by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "server/hello")]
    ServerHello {
        server_version: String,
        #[serde(default)]
        session_id: Option<String>,
        requires_auth: bool,
    },

    #[serde(rename = "client/hello")]
    ClientHello {
        player_id: String,
        player_name: String,
        preferred_codec: String,
        device_info: DeviceInfo,
    },

    #[serde(rename = "auth")]
    Auth { token: String },

    #[serde(rename = "auth_ok")]
    AuthOk,

    #[serde(rename = "auth_failed")]
    AuthFailed { reason: String },

    #[serde(rename = "time/req")]
    TimeReq { client_transmitted_us: i64 },

    #[serde(rename = "time/resp")]
    TimeResp {
        client_transmitted_us: i64,
        server_received_us: i64,
        server_transmitted_us: i64,
    },

    #[serde(rename = "player/state")]
    PlayerState {
        state: PlayerStateTag,
        #[serde(default)]
        position_us: Option<i64>,
        #[serde(default)]
        volume: Option<f32>,
    },

    #[serde(rename = "close")]
    Close { code: u16, reason: String },
}

impl ControlMessage {
    /// Parses a control message from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serializes a control message to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_round_trips() {
        let msg = ControlMessage::ClientHello {
            player_id: "player-1".into(),
            player_name: "Kitchen".into(),
            preferred_codec: "pcm".into(),
            device_info: DeviceInfo {
                channels: 2,
                sample_rate_hz: 48_000,
                bit_depth: 16,
                buffer_capacity: 8192,
                supported_commands: vec!["pause".into(), "resume".into()],
            },
        };
        let json = msg.to_json().unwrap();
        let parsed = ControlMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn time_req_uses_slash_tag() {
        let msg = ControlMessage::TimeReq {
            client_transmitted_us: 123,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"time/req\""));
    }

    #[test]
    fn player_state_buffering_serializes_snake_case() {
        let msg = ControlMessage::PlayerState {
            state: PlayerStateTag::Buffering,
            position_us: None,
            volume: None,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"state\":\"buffering\""));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let bad = r#"{"type":"not/a/real/message"}"#;
        assert!(ControlMessage::from_json(bad).is_err());
    }
}
