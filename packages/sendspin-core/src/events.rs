//! Telemetry event system, decoupling sync/transport/scheduler internals
//! from whatever observes them (logs, a host application, tests).
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! channel, so the transport that eventually broadcasts these events can
//! change without touching the sync/transport/scheduler code that emits
//! them.

use serde::Serialize;

use crate::protocol::messages::PlayerStateTag;
use crate::scheduler::{SyncAction, SyncCorrectionEvent};

/// Events emitted by the time-sync engine (C3).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A burst completed and produced at least one accepted offset sample.
    BurstCompleted {
        accepted: usize,
        rejected: usize,
        rtt_floor_us: i64,
    },
    /// An entire burst was rejected due to an elevated RTT floor.
    BurstRejected { best_rtt_us: i64, floor_us: i64 },
    /// The clock filter became ready (second accepted measurement).
    FilterReady,
    /// The filter was explicitly reset.
    FilterReset,
}

/// Events emitted by the session transport (C2).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportEvent {
    Connecting,
    Connected,
    AuthOk,
    AuthFailed { reason: String },
    Closed { code: u16 },
    Failed { reason: String },
    RecoverableError { reason: String },
}

/// Events emitted by the sync audio scheduler (C5).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SchedulerEvent {
    StateChanged {
        from: String,
        to: String,
        /// The `player/state` tag the new state maps to, so an emitter that
        /// forwards to the server doesn't need to re-derive it from `to`.
        tag: PlayerStateTag,
    },
    GenerationAdvanced { generation: u64 },
    ChunkDropped { reason: &'static str, target_server_us: i64 },
    Underrun,
    Correction(SyncCorrectionEvent),
}

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    fn emit_sync(&self, event: SyncEvent);
    fn emit_transport(&self, event: TransportEvent);
    fn emit_scheduler(&self, event: SchedulerEvent);
}

/// Discards every event. Used when a host embeds this crate without caring
/// about telemetry (e.g. a minimal test harness).
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_sync(&self, _event: SyncEvent) {}
    fn emit_transport(&self, _event: TransportEvent) {}
    fn emit_scheduler(&self, _event: SchedulerEvent) {}
}

/// Logs every event at debug level via `tracing`. Used by the CLI player
/// when no richer telemetry sink is configured.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_sync(&self, event: SyncEvent) {
        tracing::debug!(?event, "sync_event");
    }

    fn emit_transport(&self, event: TransportEvent) {
        tracing::debug!(?event, "transport_event");
    }

    fn emit_scheduler(&self, event: SchedulerEvent) {
        match &event {
            SchedulerEvent::Correction(c) if matches!(c.action, SyncAction::Hold) => {
                tracing::trace!(?event, "scheduler_event");
            }
            _ => tracing::debug!(?event, "scheduler_event"),
        }
    }
}

/// Forwards every scheduler state transition to a channel as its
/// `player/state` tag, while still delegating all events (including the
/// same transitions) to an inner emitter. Lets a host turn scheduler
/// telemetry into outbound `player/state` messages without coupling the
/// scheduler itself to a transport.
pub struct ForwardingEventEmitter<E: EventEmitter> {
    inner: E,
    player_state_tx: tokio::sync::mpsc::UnboundedSender<PlayerStateTag>,
}

impl<E: EventEmitter> ForwardingEventEmitter<E> {
    pub fn new(
        inner: E,
        player_state_tx: tokio::sync::mpsc::UnboundedSender<PlayerStateTag>,
    ) -> Self {
        Self {
            inner,
            player_state_tx,
        }
    }
}

impl<E: EventEmitter> EventEmitter for ForwardingEventEmitter<E> {
    fn emit_sync(&self, event: SyncEvent) {
        self.inner.emit_sync(event);
    }

    fn emit_transport(&self, event: TransportEvent) {
        self.inner.emit_transport(event);
    }

    fn emit_scheduler(&self, event: SchedulerEvent) {
        if let SchedulerEvent::StateChanged { tag, .. } = &event {
            let _ = self.player_state_tx.send(*tag);
        }
        self.inner.emit_scheduler(event);
    }
}
