//! Byte-transfer progress accounting
//!
//! A [`TransferReporter`] sits between a producer of raw byte counts (the
//! pull orchestrator, the installer download) and the caller's progress
//! callback, turning increments into cumulative snapshots against a declared
//! total.

use serde::Serialize;

/// Snapshot forwarded to the progress callback on every reporter update.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Key identifying the logical operation, stable across its updates.
    pub key: String,
    /// Bytes accounted for by this update.
    pub increment: u64,
    /// Human-readable label for the current phase of the operation.
    pub status: String,
    /// Running total of bytes accounted for so far.
    pub completed: u64,
    /// Declared total for the whole operation.
    pub total: u64,
}

/// Callback interface progress is pushed through.
///
/// The engine is the sole producer per operation; the caller owns rendering
/// and any rate limiting.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Accumulates increments between `begin` and `done` and forwards one
/// snapshot per update. `update` may be called zero or many times in
/// between.
pub struct TransferReporter<'a> {
    sink: &'a dyn ProgressSink,
    key: String,
    total: u64,
    completed: u64,
}

impl<'a> TransferReporter<'a> {
    /// Start reporting an operation with a declared byte total.
    pub fn begin(sink: &'a dyn ProgressSink, key: impl Into<String>, total: u64) -> Self {
        Self {
            sink,
            key: key.into(),
            total,
            completed: 0,
        }
    }

    /// Account for `increment` bytes and forward a snapshot.
    pub fn update(&mut self, increment: u64, status: &str) {
        self.completed += increment;
        self.sink.report(ProgressEvent {
            key: self.key.clone(),
            increment,
            status: status.to_string(),
            completed: self.completed,
            total: self.total,
        });
    }

    /// Bytes accounted for so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Finish the operation, emitting a final update covering any shortfall
    /// between the accumulated count and the declared total.
    pub fn done(mut self) {
        let shortfall = self.total.saturating_sub(self.completed);
        self.update(shortfall, "completed");
    }
}
