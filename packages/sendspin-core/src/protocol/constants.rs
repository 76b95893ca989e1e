//! Fixed protocol constants defined by the SendSpin wire specification.
//!
//! These are not tunables — changing them breaks wire compatibility with
//! any SendSpin server.

// ─────────────────────────────────────────────────────────────────────────────
// Binary audio record header
// ─────────────────────────────────────────────────────────────────────────────

/// Size of the binary audio record header, in bytes.
pub const RECORD_HEADER_LEN: usize = 32;

/// Header version this codec emits and expects.
pub const RECORD_VERSION: u8 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Time-sync engine
// ─────────────────────────────────────────────────────────────────────────────

/// Number of probes per burst.
pub const BURST_SIZE: usize = 8;

/// Spacing between probes within a burst (ms).
pub const PROBE_SPACING_MS: u64 = 100;

/// Total timeout for one burst, including all spacing and response waits.
pub const BURST_TIMEOUT_MS: u64 = 1500;

/// Number of burst winners (lowest RTT survivors) kept per burst.
/// `ceil(BURST_SIZE / 2)`.
pub const BURST_WINNERS: usize = (BURST_SIZE + 1) / 2;

/// Number of recent burst winners the RTT-floor estimator slides over.
pub const RTT_FLOOR_WINDOW: usize = 16;

/// Multiplier applied to the RTT floor when deciding whether an entire
/// burst should be rejected as having run during a network stall.
pub const RTT_FLOOR_REJECT_MULTIPLIER: f64 = 1.5;

/// Additive margin (microseconds) added on top of the RTT floor for the
/// same rejection decision, so a floor of zero doesn't make rejection
/// trivially easy.
pub const RTT_FLOOR_REJECT_MARGIN_US: i64 = 2_000;

/// A single probe's RTT outside `(0, RTT_DISCARD_MAX_US]` is discarded
/// before burst aggregation ever sees it.
pub const RTT_DISCARD_MAX_US: i64 = 1_000_000;

// ─────────────────────────────────────────────────────────────────────────────
// Sync audio scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Chunks whose target time is this far in the past when they reach the
/// front of the queue are dropped rather than played late.
pub const LATE_THRESHOLD_MS: i64 = 200;

/// Chunks whose target time is this far in the future are treated as a
/// protocol/clock anomaly and dropped.
pub const FUTURE_THRESHOLD_MS: i64 = 10_000;

/// Maximum samples inserted or dropped in a single correction tick,
/// regardless of how large the measured error is.
pub const MAX_CORRECTION_SAMPLES_PER_TICK: u32 = 64;

/// Default bound on the chunk queue (entries), beyond which the oldest
/// entry is dropped to make room for the newest.
pub const DEFAULT_CHUNK_QUEUE_CAPACITY: usize = 512;

// ─────────────────────────────────────────────────────────────────────────────
// Timeouts
// ─────────────────────────────────────────────────────────────────────────────

/// Transport connect timeout (seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Auth handshake timeout (seconds).
pub const AUTH_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a generic command round-trip (seconds).
pub const COMMAND_TIMEOUT_SECS: u64 = 30;

/// Idle-connection keepalive ping interval (seconds).
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Close codes
// ─────────────────────────────────────────────────────────────────────────────

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_AUTH_REQUIRED: u16 = 4001;
pub const CLOSE_AUTH_FAILED: u16 = 4003;
pub const CLOSE_PROTOCOL_VERSION_MISMATCH: u16 = 4010;
pub const CLOSE_SERVER_SHUTTING_DOWN: u16 = 4020;

// ─────────────────────────────────────────────────────────────────────────────
// Application configuration bounds
// ─────────────────────────────────────────────────────────────────────────────

/// `sync_offset_ms` is clamped to this symmetric range.
pub const SYNC_OFFSET_MS_MAX: i64 = 5_000;
