//! Centralized error types for the SendSpin player core.
//!
//! Mirrors the error-kind classification from the specification: `Protocol`,
//! `Transport`, `Auth`, `Codec`, `Scheduling` and `Filter` errors. Only
//! `Transport` and `Auth` variants are ever fatal to the caller driving the
//! session; the others are handled internally by their owning component and
//! surfaced as telemetry instead.

use thiserror::Error;

/// Top-level error type for the SendSpin player core.
#[derive(Debug, Error)]
pub enum SendSpinError {
    /// Malformed or unexpected wire data (bad JSON, truncated binary
    /// record, unknown message type).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure (connect, send, close, socket error).
    #[error("transport error: {0}")]
    Transport(String),

    /// Authentication handshake failed or was rejected by the server.
    #[error("auth error: {0}")]
    Auth(String),

    /// Audio codec configure/decode/flush failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Sync audio scheduler internal failure.
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// Clock filter internal failure (e.g. non-finite measurement).
    #[error("filter error: {0}")]
    Filter(String),
}

impl SendSpinError {
    /// Machine-readable error code, stable across releases, used in
    /// telemetry events and log lines rather than any HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol_error",
            Self::Transport(_) => "transport_error",
            Self::Auth(_) => "auth_error",
            Self::Codec(_) => "codec_error",
            Self::Scheduling(_) => "scheduling_error",
            Self::Filter(_) => "filter_error",
        }
    }

    /// Whether this error is fatal to an active session (only `Transport`
    /// and `Auth` errors are; everything else is handled internally by its
    /// owning component).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Auth(_))
    }
}

/// Convenience result alias for core operations.
pub type SendSpinResult<T> = Result<T, SendSpinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_auth_errors_are_fatal() {
        assert!(SendSpinError::Transport("closed".into()).is_fatal());
        assert!(SendSpinError::Auth("rejected".into()).is_fatal());
    }

    #[test]
    fn internal_errors_are_not_fatal() {
        assert!(!SendSpinError::Protocol("bad frame".into()).is_fatal());
        assert!(!SendSpinError::Codec("decode failed".into()).is_fatal());
        assert!(!SendSpinError::Scheduling("queue full".into()).is_fatal());
        assert!(!SendSpinError::Filter("nan".into()).is_fatal());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(SendSpinError::Protocol("x".into()).code(), "protocol_error");
        assert_eq!(SendSpinError::Auth("x".into()).code(), "auth_error");
    }
}
