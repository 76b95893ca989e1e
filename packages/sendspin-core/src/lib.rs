//! sendspin-core - player-side time-sync and scheduling core for SendSpin.
//!
//! This crate implements the client half of the SendSpin protocol: a
//! player that connects to a SendSpin server, measures and tracks the
//! offset between its own clock and the server's via repeated time-sync
//! bursts, and schedules decoded audio chunks for output at the moment
//! the server intended, correcting for drift as it accumulates.
//!
//! # Architecture
//!
//! - [`protocol`]: wire types — JSON control messages and the binary
//!   audio record codec (C1)
//! - [`transport`]: the WebSocket session to a single server (C2)
//! - [`timesync`]: the burst-probing time-sync engine (C3)
//! - [`filter`]: the two-state Kalman clock filter (C4)
//! - [`scheduler`]: the sync audio scheduler, decoder policy and chunk
//!   queue (C5)
//! - [`sink`]: local audio output abstraction
//! - [`config`]: player configuration
//! - [`events`]: telemetry event system decoupling internals from
//!   whatever observes them
//! - [`error`]: centralized error types
//!
//! # Abstraction traits
//!
//! - [`events::EventEmitter`]: emitting domain events
//! - [`sink::AudioSink`]: local audio output
//! - [`scheduler::codec_decoder::Decoder`]: codec backends
//! - [`runtime::TaskSpawner`]: spawning background tasks
//! - [`lifecycle::Lifecycle`]: graceful shutdown

pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod lifecycle;
pub mod protocol;
pub mod runtime;
pub mod scheduler;
pub mod sink;
pub mod timesync;
pub mod transport;

pub use config::PlayerConfig;
pub use error::{SendSpinError, SendSpinResult};
pub use events::{
    EventEmitter, ForwardingEventEmitter, LoggingEventEmitter, NoopEventEmitter, SchedulerEvent,
    SyncEvent, TransportEvent,
};
pub use filter::ClockFilter;
pub use lifecycle::{Lifecycle, NoopLifecycle, ProcessLifecycle};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use scheduler::{PlaybackState, SyncScheduler};
pub use sink::{AudioSink, CpalSink, RecordingSink};
pub use timesync::TimeSyncEngine;
pub use transport::SessionTransport;
