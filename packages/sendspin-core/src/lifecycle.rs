//! Process lifecycle abstraction.
//!
//! Gives the binary crate a single trait to call into when it wants a
//! graceful shutdown, so the core library never reaches for
//! `std::process::exit` itself.

/// Trait for process-level lifecycle operations.
pub trait Lifecycle: Send + Sync {
    /// Requests a graceful shutdown: close the transport, drain the
    /// scheduler, then exit.
    fn request_shutdown(&self);
}

/// Lifecycle implementation for the standalone player binary: logs and
/// exits the process. Resource cleanup (transport close, scheduler drain)
/// happens before this is called, not inside it.
pub struct ProcessLifecycle;

impl Lifecycle for ProcessLifecycle {
    fn request_shutdown(&self) {
        tracing::info!("shutdown requested");
        std::process::exit(0);
    }
}

/// No-op lifecycle for embedding this crate in a host that manages its own
/// process lifetime (e.g. tests).
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn request_shutdown(&self) {
        tracing::debug!("shutdown requested (no-op)");
    }
}
