//! Player configuration.
//!
//! Loaded from an optional YAML file with environment variable overrides
//! applied on top (file-then-env); the binary crate applies CLI-argument
//! overrides on top of the result in turn.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::protocol::constants::SYNC_OFFSET_MS_MAX;

/// Player-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// WebSocket URL of the SendSpin server (`ws://` or `wss://`).
    /// Override: `SENDSPIN_SERVER_URL`
    pub server_url: String,

    /// Stable identifier for this player, sent in `client/hello`.
    /// Override: `SENDSPIN_PLAYER_ID`
    pub player_id: String,

    /// Human-readable player name shown in server UIs.
    pub player_name: String,

    /// Codec requested in `client/hello` (`"pcm"` or `"opus"`).
    pub preferred_codec: String,

    /// Output sample rate in Hz.
    pub sample_rate_hz: u32,

    /// Output channel count (1 or 2).
    pub channels: u8,

    /// Bearer token sent in the `auth` message, if the server requires it.
    /// Override: `SENDSPIN_AUTH_TOKEN`
    pub auth_token: Option<String>,

    /// Manual clock offset applied on top of the measured filter offset,
    /// clamped to `[-SYNC_OFFSET_MS_MAX, SYNC_OFFSET_MS_MAX]`.
    pub sync_offset_ms: i64,

    /// Bound on the chunk queue, in entries.
    pub chunk_queue_capacity: usize,

    /// Initial output volume, `0.0..=1.0`.
    pub volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8927/ws".to_string(),
            player_id: "sendspin-player".to_string(),
            player_name: "SendSpin Player".to_string(),
            preferred_codec: "opus".to_string(),
            sample_rate_hz: 48_000,
            channels: 2,
            auth_token: None,
            sync_offset_ms: 0,
            chunk_queue_capacity: 512,
            volume: 1.0,
        }
    }
}

impl PlayerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides. `path` of `None` starts from [`PlayerConfig::default`].
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read config file {}: {e}", path.display()))?;
            serde_yaml::from_str(&content)
                .map_err(|e| format!("failed to parse config file {}: {e}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SENDSPIN_SERVER_URL") {
            self.server_url = val;
        }
        if let Ok(val) = std::env::var("SENDSPIN_PLAYER_ID") {
            self.player_id = val;
        }
        if let Ok(val) = std::env::var("SENDSPIN_AUTH_TOKEN") {
            self.auth_token = Some(val);
        }
    }

    /// Validates the configuration, returning the first violated bound.
    pub fn validate(&self) -> Result<(), String> {
        if self.server_url.is_empty() {
            return Err("server_url must not be empty".to_string());
        }
        if !matches!(self.channels, 1 | 2) {
            return Err(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            ));
        }
        if self.sample_rate_hz == 0 {
            return Err("sample_rate_hz must be >= 1".to_string());
        }
        if self.chunk_queue_capacity == 0 {
            return Err("chunk_queue_capacity must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(format!("volume must be in [0.0, 1.0], got {}", self.volume));
        }
        let max = SYNC_OFFSET_MS_MAX;
        if self.sync_offset_ms < -max || self.sync_offset_ms > max {
            return Err(format!(
                "sync_offset_ms must be in [{}, {}], got {}",
                -max, max, self.sync_offset_ms
            ));
        }
        Ok(())
    }
}
