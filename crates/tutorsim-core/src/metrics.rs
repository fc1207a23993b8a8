//! Global atomic counters for Tutorsim.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a batch finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    sessions_started: AtomicU64,
    sessions_finished: AtomicU64,
    sessions_failed: AtomicU64,
    turns_completed: AtomicU64,
    batches_completed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            sessions_finished: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            turns_completed: AtomicU64::new(0),
            batches_completed: AtomicU64::new(0),
        }
    }

    pub fn inc_sessions_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_started", "counter incremented");
    }

    /// Count a session that produced a record, failed or not.
    pub fn inc_sessions_finished(&self) {
        self.sessions_finished.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_finished", "counter incremented");
    }

    pub fn inc_sessions_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_failed", "counter incremented");
    }

    pub fn inc_turns(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "turns_completed", "counter incremented");
    }

    pub fn inc_batches_completed(&self) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "batches_completed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            sessions_started = self.sessions_started(),
            sessions_finished = self.sessions_finished(),
            sessions_failed = self.sessions_failed(),
            turns_completed = self.turns_completed(),
            batches_completed = self.batches_completed(),
        );
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn sessions_finished(&self) -> u64 {
        self.sessions_finished.load(Ordering::Relaxed)
    }

    pub fn sessions_failed(&self) -> u64 {
        self.sessions_failed.load(Ordering::Relaxed)
    }

    pub fn turns_completed(&self) -> u64 {
        self.turns_completed.load(Ordering::Relaxed)
    }

    pub fn batches_completed(&self) -> u64 {
        self.batches_completed.load(Ordering::Relaxed)
    }
}
